use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch, Notify},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    engine::{AudioEngine, Completion, VoiceChannel},
    queue::{PlaylistAdded, QueueLimits, SongQueue},
    track::{PlaylistInfo, Track},
    votes::{SkipTarget, SkipVoteAggregator, VoteTally},
};
use crate::{
    cache::{AudioCache, CacheLease, CacheSettings},
    error::{DjError, DjResult},
    sources::Downloader,
};

/// How long the engine gets to confirm a stop before the loop moves on.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const RESET_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Fetching,
    Playing,
    Stopping,
}

/// Notifications from the playback loop, meant for the chat channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    TrackStarted(Track),
    TrackFailed { track: Track, reason: String },
    TrackSkipped {
        track: Track,
        /// The whole playlist was skipped
        playlist: bool,
        /// Songs of the playlist removed from the queue
        removed: usize,
    },
    QueueFinished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSettings {
    pub default: f32,
    pub lowest: f32,
    pub highest: f32,
}

impl VolumeSettings {
    pub fn clamp(&self, volume: f32) -> f32 {
        volume.max(self.lowest).min(self.highest)
    }
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            default: 0.2,
            lowest: 0.01,
            highest: 0.8,
        }
    }
}

/// Resolved settings the controller runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSettings {
    pub skip_ratio: f32,
    pub playlist_skip_ratio: f32,
    /// Admin skips stop the song at once instead of counting as one vote
    pub admin_skip_bypasses_ratio: bool,
    pub volume: VolumeSettings,
    pub limits: QueueLimits,
    pub cache: CacheSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            skip_ratio: 0.5,
            playlist_skip_ratio: 0.5,
            admin_skip_bypasses_ratio: true,
            volume: VolumeSettings::default(),
            limits: QueueLimits::default(),
            cache: CacheSettings::default(),
        }
    }
}

struct NowPlaying {
    track: Track,
    stop: CancellationToken,
}

struct Prefetch {
    key: String,
    cancel: CancellationToken,
    handle: JoinHandle<DjResult<CacheLease>>,
}

/// Máquina de estados de reproducción.
///
/// A single task started by [`start`](Self::start) walks the queue: it takes
/// the head, gets its audio from the cache or the downloader, hands the file to
/// the [`AudioEngine`] and waits for the completion. Command handlers talk to
/// the controller concurrently; every method returns promptly and wakes the
/// loop when the queue changed.
///
/// While a song plays, the next one is downloaded ahead of time. If the head
/// of the queue changes, that download is cancelled.
pub struct PlaybackController {
    queue: SongQueue,
    votes: SkipVoteAggregator,
    cache: Arc<AudioCache>,
    downloader: Arc<Downloader>,
    engine: Arc<dyn AudioEngine>,
    channel: Arc<dyn VoiceChannel>,
    settings: Mutex<PlaybackSettings>,
    volume: Mutex<f32>,
    current: Mutex<Option<NowPlaying>>,
    /// Last track handed to the loop; its playlist decides whether the
    /// playlist votes carry over
    last_track: Mutex<Option<Track>>,
    prefetch: Mutex<Option<Prefetch>>,
    wake: Notify,
    state: watch::Sender<PlaybackState>,
    events: broadcast::Sender<PlaybackEvent>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackController {
    pub fn new(
        settings: PlaybackSettings,
        cache: Arc<AudioCache>,
        downloader: Arc<Downloader>,
        engine: Arc<dyn AudioEngine>,
        channel: Arc<dyn VoiceChannel>,
    ) -> Arc<Self> {
        downloader.set_max_song_duration(settings.limits.max_song_duration);
        let (state, _) = watch::channel(PlaybackState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            queue: SongQueue::new(settings.limits),
            votes: SkipVoteAggregator::new(),
            cache,
            downloader,
            engine,
            channel,
            volume: Mutex::new(settings.volume.clamp(settings.volume.default)),
            settings: Mutex::new(settings),
            current: Mutex::new(None),
            last_track: Mutex::new(None),
            prefetch: Mutex::new(None),
            wake: Notify::new(),
            state,
            events,
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Lanza el bucle de reproducción. Calling it twice has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let controller = self.clone();
        *task = Some(tokio::spawn(async move { controller.run().await }));
    }

    /// Stops playback and ends the loop. The state ends in `Idle` and every
    /// cache reference held by the loop is released.
    pub async fn shutdown(&self) {
        info!("🛑 Deteniendo reproducción");
        self.shutdown.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("⚠️ El bucle de reproducción no terminó a tiempo");
            }
        }
        self.cancel_prefetch();
        self.set_state(PlaybackState::Idle);
    }

    /// Despierta el bucle para que revise la cola.
    pub fn advance(&self) {
        self.wake.notify_one();
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> PlaybackSettings {
        self.settings.lock().clone()
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }

    // --- cola ---

    pub fn enqueue(&self, track: Track) -> DjResult<()> {
        self.queue.enqueue(track)?;
        self.queue_changed();
        Ok(())
    }

    pub fn enqueue_playlist(&self, playlist: PlaylistInfo, tracks: Vec<Track>) -> PlaylistAdded {
        let added = self.queue.enqueue_playlist(playlist, tracks);
        if added.added > 0 {
            self.queue_changed();
        }
        added
    }

    pub fn shuffle(&self) {
        self.queue.shuffle();
        self.queue_changed();
    }

    pub fn set_automatic_shuffle(&self, enabled: bool) {
        self.queue.set_automatic_shuffle(enabled);
        self.settings.lock().limits.automatic_shuffle = enabled;
        self.queue_changed();
    }

    pub fn automatic_shuffle(&self) -> bool {
        self.queue.automatic_shuffle()
    }

    pub fn remove_by_submitter(&self, submitter: &str) -> usize {
        let removed = self.queue.remove_by_submitter(submitter);
        self.queue_changed();
        removed
    }

    pub fn remove_by_playlist(&self, playlist_id: &str) -> usize {
        let removed = self.queue.remove_by_playlist(playlist_id);
        self.queue_changed();
        removed
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_snapshot(&self) -> Vec<Track> {
        self.queue.snapshot()
    }

    pub fn next_track(&self) -> Option<Track> {
        self.queue.peek()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.current.lock().as_ref().map(|now| now.track.clone())
    }

    // --- operaciones laterales ---

    /// Sets the volume, clamped to the configured bounds. Returns the value
    /// actually applied.
    pub async fn set_volume(&self, requested: f32) -> f32 {
        let volume = self.settings.lock().volume.clamp(requested);
        *self.volume.lock() = volume;
        self.engine.set_volume(volume).await;
        info!("🔊 Volumen: {:.2}", volume);
        volume
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    /// Anota la canción actual.
    pub fn set_comment(&self, comment: impl Into<String>) -> DjResult<Track> {
        let mut current = self.current.lock();
        let now = current.as_mut().ok_or(DjError::NothingPlaying)?;
        now.track.comment = Some(comment.into());
        Ok(now.track.clone())
    }

    pub async fn move_to_channel(&self, name: &str) -> DjResult<()> {
        self.channel.move_to_channel(name).await
    }

    /// Applies reloaded settings. The current volume is clamped into the new
    /// bounds.
    pub async fn apply_settings(&self, settings: PlaybackSettings) {
        self.queue.set_limits(settings.limits);
        self.downloader.set_max_song_duration(settings.limits.max_song_duration);
        self.cache.apply_settings(settings.cache);

        let volume = {
            let mut volume = self.volume.lock();
            *volume = settings.volume.clamp(*volume);
            *volume
        };
        *self.settings.lock() = settings;
        self.engine.set_volume(volume).await;
        info!("🔄 Configuración de reproducción aplicada");
    }

    // --- skips ---

    /// Vota para saltar la canción actual.
    ///
    /// With `admin` set and `admin_skip_bypasses_ratio` enabled the song is
    /// skipped at once; otherwise the vote counts against `skip_ratio` with
    /// the listener count of this moment.
    pub async fn skip(&self, voter: &str, admin: bool) -> DjResult<VoteTally> {
        let track = self.current_track().ok_or(DjError::NothingPlaying)?;
        let target = SkipTarget::Track(track.id.clone());
        let (ratio, bypass) = {
            let settings = self.settings.lock();
            (settings.skip_ratio, admin && settings.admin_skip_bypasses_ratio)
        };

        let tally = if bypass {
            self.votes.admin_skip(&target)
        } else {
            let listeners = self.channel.listener_count().await;
            self.votes.register_vote(&target, voter, listeners, ratio)
        };

        if tally.should_skip && self.stop_current(&track.id) {
            info!("⏭️ Saltando: {}", track.title);
            self.emit(PlaybackEvent::TrackSkipped {
                track,
                playlist: false,
                removed: 0,
            });
        }
        Ok(tally)
    }

    /// Vota para saltar la playlist de la canción actual.
    ///
    /// Once accepted, the current song stops and the remaining songs of the
    /// playlist leave the queue.
    pub async fn skip_playlist(&self, voter: &str, admin: bool) -> DjResult<VoteTally> {
        let track = self.current_track().ok_or(DjError::NothingPlaying)?;
        let playlist = track.playlist.clone().ok_or_else(|| {
            DjError::InvalidArgument("la canción actual no es parte de una playlist".into())
        })?;
        let target = SkipTarget::Playlist(playlist.id.clone());
        let (ratio, bypass) = {
            let settings = self.settings.lock();
            (settings.playlist_skip_ratio, admin && settings.admin_skip_bypasses_ratio)
        };

        let tally = if bypass {
            self.votes.admin_skip(&target)
        } else {
            let listeners = self.channel.listener_count().await;
            self.votes.register_vote(&target, voter, listeners, ratio)
        };

        if tally.should_skip {
            let removed = self.queue.remove_by_playlist(&playlist.id);
            self.votes.reset_playlist();
            info!("⏭️ Saltando playlist «{}» ({} canciones quitadas)", playlist.title, removed);
            if self.stop_current(&track.id) {
                self.emit(PlaybackEvent::TrackSkipped {
                    track,
                    playlist: true,
                    removed,
                });
            }
            self.queue_changed();
        }
        Ok(tally)
    }

    /// Vacía la cola, detiene la reproducción y purga el caché.
    ///
    /// Returns the number of songs removed from the queue.
    pub async fn reset(&self) -> usize {
        let cleared = self.queue.clear();
        self.cancel_prefetch();
        self.votes.reset_track();
        self.votes.reset_playlist();
        self.last_track.lock().take();
        if let Some(now) = self.current.lock().as_ref() {
            now.stop.cancel();
        }

        // Espera a que se suelte la canción actual antes de purgar
        let mut state = self.state.subscribe();
        let idle = tokio::time::timeout(
            RESET_TIMEOUT,
            state.wait_for(|s| *s == PlaybackState::Idle),
        )
        .await;
        if !matches!(idle, Ok(Ok(_))) {
            warn!("⚠️ La reproducción no se detuvo a tiempo durante el reset");
        }

        let purged = self.cache.purge();
        info!("🧹 Reset: {} canciones quitadas, {} archivos purgados", cleared, purged);
        cleared
    }

    // --- bucle ---

    async fn run(self: Arc<Self>) {
        info!("▶️ Bucle de reproducción iniciado");
        let mut busy = false;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let Some(track) = self.queue.dequeue() else {
                self.set_state(PlaybackState::Idle);
                self.last_track.lock().take();
                if busy {
                    busy = false;
                    info!("📭 Cola terminada");
                    self.emit(PlaybackEvent::QueueFinished);
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.wake.notified() => continue,
                }
            };

            busy = true;
            self.play_track(track).await;
        }

        self.cancel_prefetch();
        self.current.lock().take();
        self.set_state(PlaybackState::Idle);
        info!("⏹️ Bucle de reproducción terminado");
    }

    async fn play_track(&self, track: Track) {
        let stop = self.shutdown.child_token();
        *self.current.lock() = Some(NowPlaying {
            track: track.clone(),
            stop: stop.clone(),
        });

        self.votes.reset_track();
        let previous = self.last_track.lock().replace(track.clone());
        let same_playlist = previous.is_some_and(|p| p.same_playlist(&track));
        if !same_playlist {
            self.votes.reset_playlist();
        }

        self.set_state(PlaybackState::Fetching);
        self.cache.sweep();

        let lease = match self.prepare(&track, &stop).await {
            Ok(lease) => lease,
            Err(DjError::Cancelled) => {
                debug!("🚫 {} cancelada antes de sonar", track.title);
                self.current.lock().take();
                return;
            }
            Err(e) => {
                self.fail(track, e);
                return;
            }
        };

        if stop.is_cancelled() {
            self.current.lock().take();
            return;
        }

        let volume = self.volume();
        let completion = match self.engine.start_playback(lease.path(), volume).await {
            Ok(completion) => completion,
            Err(e) => {
                self.fail(track, e);
                return;
            }
        };

        self.set_state(PlaybackState::Playing);
        info!("🎵 Reproduciendo: {}", track);
        self.emit(PlaybackEvent::TrackStarted(track));

        self.wait_for_completion(completion, &stop).await;
        drop(lease);
        self.current.lock().take();
    }

    /// Gets the audio of `track`, from the prefetch if it matches, the cache,
    /// or a fresh download.
    async fn prepare(&self, track: &Track, stop: &CancellationToken) -> DjResult<CacheLease> {
        let prefetched = {
            let mut slot = self.prefetch.lock();
            match slot.take() {
                Some(p) if p.key == track.id => Some(p),
                Some(p) => {
                    p.cancel.cancel();
                    None
                }
                None => None,
            }
        };

        if let Some(Prefetch { cancel, handle, .. }) = prefetched {
            debug!("⚡ Usando precarga de {}", track.title);
            return tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    cancel.cancel();
                    Err(DjError::Cancelled)
                }
                joined = handle => match joined {
                    Ok(result) => result,
                    Err(e) => Err(DjError::fetch(&track.title, e)),
                },
            };
        }

        fetch_into_cache(&self.cache, &self.downloader, track, stop).await
    }

    async fn wait_for_completion(&self, mut completion: Completion, stop: &CancellationToken) {
        loop {
            self.ensure_prefetch();
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = &mut completion => return,
                _ = self.wake.notified() => {}
            }
        }

        self.set_state(PlaybackState::Stopping);
        self.engine.stop().await;
        if tokio::time::timeout(STOP_TIMEOUT, completion).await.is_err() {
            warn!("⚠️ El motor de audio no confirmó la parada");
        }
    }

    fn fail(&self, track: Track, e: DjError) {
        error!("❌ No se pudo reproducir {}: {}", track.title, e);
        self.current.lock().take();
        self.emit(PlaybackEvent::TrackFailed {
            track,
            reason: e.to_string(),
        });
    }

    /// Matches the prefetch with the queue head: cancels a stale one and,
    /// while playing, starts one for the new head.
    fn ensure_prefetch(&self) {
        let head = self.queue.peek();
        let mut slot = self.prefetch.lock();

        if let Some(p) = slot.as_ref() {
            if head.as_ref().is_some_and(|t| t.id == p.key) {
                return;
            }
            debug!("🔄 La cabeza de la cola cambió, cancelando precarga de {}", p.key);
            p.cancel.cancel();
            *slot = None;
        }

        if self.state() != PlaybackState::Playing {
            return;
        }
        let Some(track) = head else {
            return;
        };

        debug!("⏳ Precargando: {}", track.title);
        let cancel = self.shutdown.child_token();
        let key = track.id.clone();
        let cache = self.cache.clone();
        let downloader = self.downloader.clone();
        let token = cancel.clone();
        let handle =
            tokio::spawn(async move { fetch_into_cache(&cache, &downloader, &track, &token).await });
        *slot = Some(Prefetch { key, cancel, handle });
    }

    fn cancel_prefetch(&self) {
        if let Some(p) = self.prefetch.lock().take() {
            p.cancel.cancel();
        }
    }

    fn queue_changed(&self) {
        self.ensure_prefetch();
        self.advance();
    }

    /// Cancels the current song if it is still `track_id`.
    fn stop_current(&self, track_id: &str) -> bool {
        match self.current.lock().as_ref() {
            Some(now) if now.track.id == track_id && !now.stop.is_cancelled() => {
                now.stop.cancel();
                true
            }
            _ => false,
        }
    }

    fn set_state(&self, state: PlaybackState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("🎚️ Estado: {:?} -> {:?}", previous, state);
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        // Sin suscriptores no hay a quién avisar
        let _ = self.events.send(event);
    }
}

async fn fetch_into_cache(
    cache: &Arc<AudioCache>,
    downloader: &Downloader,
    track: &Track,
    cancel: &CancellationToken,
) -> DjResult<CacheLease> {
    if let Some(lease) = cache.acquire_lease(track) {
        debug!("💾 En caché: {}", track.title);
        return Ok(lease);
    }
    let fetched = downloader.fetch(track, cache.directory(), cancel).await?;
    Ok(cache.insert_lease(track, fetched.path, fetched.size_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::engine::{fakes::FakeEngine, MockVoiceChannel},
        cache::partial_files,
        sources::AudioFetcher,
    };
    use async_trait::async_trait;
    use std::{collections::HashSet, path::Path, sync::atomic::Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedFetcher {
        fail: HashSet<String>,
        hang: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn failing(ids: &[&str]) -> Self {
            Self {
                fail: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn hanging(ids: &[&str]) -> Self {
            Self {
                hang: ids.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl AudioFetcher for ScriptedFetcher {
        async fn fetch(&self, track: &Track, destination: &Path) -> DjResult<()> {
            self.calls.lock().push(track.id.clone());
            if self.fail.contains(&track.id) {
                return Err(DjError::fetch(&track.title, "HTTP 404"));
            }
            tokio::fs::write(destination, b"audio").await?;
            if self.hang.contains(&track.id) {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    struct Harness {
        ctl: Arc<PlaybackController>,
        engine: Arc<FakeEngine>,
        fetcher: Arc<ScriptedFetcher>,
        cache: Arc<AudioCache>,
        events: broadcast::Receiver<PlaybackEvent>,
        dir: TempDir,
    }

    fn harness(fetcher: ScriptedFetcher, listeners: usize, settings: PlaybackSettings) -> Harness {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(AudioCache::open(dir.path(), settings.cache).unwrap());
        let fetcher = Arc::new(fetcher);
        let downloader = Arc::new(Downloader::new(
            fetcher.clone(),
            Duration::ZERO,
            Duration::from_secs(5),
        ));
        let engine = Arc::new(FakeEngine::default());
        let mut channel = MockVoiceChannel::new();
        channel.expect_listener_count().return_const(listeners);

        let ctl = PlaybackController::new(
            settings,
            cache.clone(),
            downloader,
            engine.clone(),
            Arc::new(channel),
        );
        let events = ctl.subscribe();
        Harness {
            ctl,
            engine,
            fetcher,
            cache,
            events,
            dir,
        }
    }

    fn song(id: &str) -> Track {
        Track::new(id, format!("https://example.com/{id}"), id.to_uppercase(), Duration::from_secs(120), "ana")
    }

    async fn next_event(events: &mut broadcast::Receiver<PlaybackEvent>) -> PlaybackEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event in time")
            .expect("event channel closed")
    }

    async fn started(events: &mut broadcast::Receiver<PlaybackEvent>) -> String {
        match next_event(events).await {
            PlaybackEvent::TrackStarted(track) => track.id,
            other => panic!("expected TrackStarted, got {other:?}"),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_advance_from_idle_reaches_playing() {
        let mut h = harness(ScriptedFetcher::default(), 3, PlaybackSettings::default());
        assert_eq!(h.ctl.state(), PlaybackState::Idle);

        h.ctl.start();
        h.ctl.enqueue(song("a")).unwrap();

        assert_eq!(started(&mut h.events).await, "a");
        assert_eq!(h.ctl.state(), PlaybackState::Playing);
        assert_eq!(h.ctl.current_track().map(|t| t.id), Some("a".to_string()));
        assert_eq!(h.engine.started.lock()[0], h.dir.path().join("a.m4a"));
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetch_failures_keep_advancing_until_idle() {
        let mut h = harness(ScriptedFetcher::failing(&["a", "b"]), 3, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.enqueue(song("b")).unwrap();
        h.ctl.start();

        for expected in ["a", "b"] {
            match next_event(&mut h.events).await {
                PlaybackEvent::TrackFailed { track, reason } => {
                    assert_eq!(track.id, expected);
                    assert!(reason.contains("HTTP 404"));
                }
                other => panic!("expected TrackFailed, got {other:?}"),
            }
        }
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::QueueFinished);
        assert_eq!(h.ctl.state(), PlaybackState::Idle);
        assert!(h.engine.started.lock().is_empty());
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_then_success_plays_the_survivor() {
        let mut h = harness(ScriptedFetcher::failing(&["a"]), 3, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.enqueue(song("b")).unwrap();
        h.ctl.start();

        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::TrackFailed { .. }));
        assert_eq!(started(&mut h.events).await, "b");
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_engine_failure_advances_like_a_fetch_failure() {
        let mut h = harness(ScriptedFetcher::default(), 3, PlaybackSettings::default());
        h.engine.fail.store(true, Ordering::SeqCst);
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.start();

        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::TrackFailed { .. }));
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::QueueFinished);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_finished_tracks_advance_and_release_files() {
        let mut h = harness(ScriptedFetcher::default(), 3, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.enqueue(song("b")).unwrap();
        h.ctl.start();

        assert_eq!(started(&mut h.events).await, "a");
        h.engine.finish();
        assert_eq!(started(&mut h.events).await, "b");
        // Caché desactivado: el archivo de «a» se borra al terminar
        assert!(!h.dir.path().join("a.m4a").exists());

        h.engine.finish();
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::QueueFinished);
        assert_eq!(h.cache.len(), 0);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_next_track_is_prefetched_while_playing() {
        let mut h = harness(ScriptedFetcher::default(), 3, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.enqueue(song("b")).unwrap();
        h.ctl.start();

        assert_eq!(started(&mut h.events).await, "a");
        let fetcher = h.fetcher.clone();
        wait_until(|| fetcher.calls().contains(&"b".to_string())).await;

        h.engine.finish();
        assert_eq!(started(&mut h.events).await, "b");
        assert_eq!(h.fetcher.calls(), vec!["a".to_string(), "b".to_string()]);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_vote_skip_stops_playback_and_resets_votes() {
        let mut h = harness(ScriptedFetcher::default(), 4, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.enqueue(song("b")).unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");

        let first = h.ctl.skip("ana", false).await.unwrap();
        assert!(!first.should_skip);
        let second = h.ctl.skip("bob", false).await.unwrap();
        assert!(second.should_skip);

        match next_event(&mut h.events).await {
            PlaybackEvent::TrackSkipped { track, playlist, .. } => {
                assert_eq!(track.id, "a");
                assert!(!playlist);
            }
            other => panic!("expected TrackSkipped, got {other:?}"),
        }
        assert_eq!(started(&mut h.events).await, "b");
        assert_eq!(h.engine.stops.load(Ordering::SeqCst), 1);

        // Los votos de «a» no cuentan para «b»
        let fresh = h.ctl.skip("ana", false).await.unwrap();
        assert_eq!(fresh.votes, 1);
        assert!(!fresh.should_skip);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_skip_bypasses_ratio_when_enabled() {
        let mut h = harness(ScriptedFetcher::default(), 10, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");

        assert!(h.ctl.skip("admin", true).await.unwrap().should_skip);
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::TrackSkipped { .. }));
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::QueueFinished);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_admin_skip_counts_as_vote_when_bypass_disabled() {
        let settings = PlaybackSettings {
            admin_skip_bypasses_ratio: false,
            ..Default::default()
        };
        let mut h = harness(ScriptedFetcher::default(), 10, settings);
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");

        let tally = h.ctl.skip("admin", true).await.unwrap();
        assert!(!tally.should_skip);
        assert_eq!(tally.votes, 1);
        assert_eq!(h.ctl.state(), PlaybackState::Playing);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_skip_while_fetching_cancels_download() {
        let mut h = harness(ScriptedFetcher::hanging(&["a"]), 1, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.enqueue(song("b")).unwrap();
        h.ctl.start();

        wait_until(|| !partial_files(h.dir.path(), "a").is_empty()).await;
        assert_eq!(h.ctl.state(), PlaybackState::Fetching);

        assert!(h.ctl.skip("ana", false).await.unwrap().should_skip);
        assert!(matches!(next_event(&mut h.events).await, PlaybackEvent::TrackSkipped { .. }));
        assert_eq!(started(&mut h.events).await, "b");
        assert!(partial_files(h.dir.path(), "a").is_empty());
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_removing_the_head_cancels_its_prefetch() {
        let mut h = harness(ScriptedFetcher::hanging(&["b"]), 1, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl
            .enqueue(Track::new("b", "https://example.com/b", "B", Duration::from_secs(60), "bob"))
            .unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");

        wait_until(|| !partial_files(h.dir.path(), "b").is_empty()).await;

        assert_eq!(h.ctl.remove_by_submitter("bob"), 1);
        wait_until(|| partial_files(h.dir.path(), "b").is_empty()).await;

        h.engine.finish();
        assert_eq!(next_event(&mut h.events).await, PlaybackEvent::QueueFinished);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_playlist_skip_drops_the_rest_of_the_playlist() {
        let mut h = harness(ScriptedFetcher::default(), 1, PlaybackSettings::default());
        let playlist = PlaylistInfo {
            id: "PL".into(),
            title: "Lista".into(),
        };
        let added = h
            .ctl
            .enqueue_playlist(playlist, vec![song("p1"), song("p2"), song("p3")]);
        assert_eq!(added.added, 3);
        h.ctl.enqueue(song("s")).unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "p1");

        assert!(h.ctl.skip_playlist("ana", false).await.unwrap().should_skip);
        match next_event(&mut h.events).await {
            PlaybackEvent::TrackSkipped { playlist, removed, .. } => {
                assert!(playlist);
                assert_eq!(removed, 2);
            }
            other => panic!("expected TrackSkipped, got {other:?}"),
        }
        assert_eq!(started(&mut h.events).await, "s");
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_playlist_votes_carry_over_between_its_tracks() {
        let mut h = harness(ScriptedFetcher::default(), 4, PlaybackSettings::default());
        let playlist = PlaylistInfo {
            id: "PL".into(),
            title: "Lista".into(),
        };
        h.ctl
            .enqueue_playlist(playlist, vec![song("p1"), song("p2"), song("p3")]);
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "p1");

        let first = h.ctl.skip_playlist("ana", false).await.unwrap();
        assert_eq!(first.votes, 1);
        assert!(!first.should_skip);

        h.engine.finish();
        assert_eq!(started(&mut h.events).await, "p2");

        let second = h.ctl.skip_playlist("bob", false).await.unwrap();
        assert_eq!(second.votes, 2);
        assert!(second.should_skip);
        match next_event(&mut h.events).await {
            PlaybackEvent::TrackSkipped { track, playlist, removed } => {
                assert_eq!(track.id, "p2");
                assert!(playlist);
                assert_eq!(removed, 1);
            }
            other => panic!("expected TrackSkipped, got {other:?}"),
        }
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_playlist_votes_reset_when_the_playlist_ends() {
        let mut h = harness(ScriptedFetcher::default(), 4, PlaybackSettings::default());
        let playlist = PlaylistInfo {
            id: "PL".into(),
            title: "Lista".into(),
        };
        h.ctl.enqueue_playlist(playlist.clone(), vec![song("p1")]);
        h.ctl.enqueue(song("s")).unwrap();
        h.ctl.enqueue_playlist(playlist, vec![song("p2")]);
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "p1");
        h.ctl.skip_playlist("ana", false).await.unwrap();

        h.engine.finish();
        assert_eq!(started(&mut h.events).await, "s");
        h.engine.finish();
        assert_eq!(started(&mut h.events).await, "p2");

        let tally = h.ctl.skip_playlist("bob", false).await.unwrap();
        assert_eq!(tally.votes, 1);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_playlist_skip_needs_a_playlist() {
        let mut h = harness(ScriptedFetcher::default(), 1, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");

        let err = h.ctl.skip_playlist("ana", false).await.unwrap_err();
        assert!(err.is_validation());
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_skip_with_nothing_playing() {
        let h = harness(ScriptedFetcher::default(), 1, PlaybackSettings::default());
        assert!(matches!(h.ctl.skip("ana", false).await, Err(DjError::NothingPlaying)));
        assert!(matches!(h.ctl.set_comment("hola"), Err(DjError::NothingPlaying)));
    }

    #[tokio::test]
    async fn test_volume_requests_are_clamped() {
        let h = harness(ScriptedFetcher::default(), 1, PlaybackSettings::default());
        assert_eq!(h.ctl.volume(), 0.2);

        assert_eq!(h.ctl.set_volume(5.0).await, 0.8);
        assert_eq!(*h.engine.volume.lock(), 0.8);
        assert_eq!(h.ctl.set_volume(-1.0).await, 0.01);
        assert_eq!(h.ctl.set_volume(0.5).await, 0.5);
        assert_eq!(h.ctl.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_new_volume_bounds_clamp_current_volume() {
        let h = harness(ScriptedFetcher::default(), 1, PlaybackSettings::default());
        h.ctl.set_volume(0.7).await;

        let settings = PlaybackSettings {
            volume: VolumeSettings {
                default: 0.2,
                lowest: 0.1,
                highest: 0.5,
            },
            ..Default::default()
        };
        h.ctl.apply_settings(settings).await;
        assert_eq!(h.ctl.volume(), 0.5);
        assert_eq!(*h.engine.volume.lock(), 0.5);
    }

    #[tokio::test]
    async fn test_comment_annotates_current_track() {
        let mut h = harness(ScriptedFetcher::default(), 1, PlaybackSettings::default());
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");

        let track = h.ctl.set_comment("temazo").unwrap();
        assert_eq!(track.comment.as_deref(), Some("temazo"));
        assert_eq!(h.ctl.current_track().and_then(|t| t.comment), Some("temazo".to_string()));
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_clears_queue_and_stops() {
        let mut h = harness(ScriptedFetcher::default(), 1, PlaybackSettings::default());
        for id in ["a", "b", "c"] {
            h.ctl.enqueue(song(id)).unwrap();
        }
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");

        assert_eq!(h.ctl.reset().await, 2);
        assert_eq!(h.ctl.state(), PlaybackState::Idle);
        assert_eq!(h.ctl.queue_len(), 0);
        assert!(h.ctl.current_track().is_none());
        assert_eq!(h.cache.len(), 0);
        h.ctl.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_releases_cache_references() {
        let settings = PlaybackSettings {
            cache: CacheSettings {
                enabled: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut h = harness(ScriptedFetcher::default(), 1, settings);
        h.ctl.enqueue(song("a")).unwrap();
        h.ctl.start();
        assert_eq!(started(&mut h.events).await, "a");
        assert_eq!(h.cache.entry("a").map(|e| e.ref_count), Some(1));

        h.ctl.shutdown().await;
        assert_eq!(h.ctl.state(), PlaybackState::Idle);
        assert_eq!(h.cache.entry("a").map(|e| e.ref_count), Some(0));
        assert!(h.dir.path().join("a.m4a").exists());
    }
}
