use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::{collections::VecDeque, time::Duration};
use tracing::{debug, info};

use super::track::{PlaylistInfo, Track};
use crate::error::{DjError, DjResult};

/// Limits applied when songs enter the queue.
///
/// A zero value disables the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueLimits {
    pub max_song_duration: Duration,
    pub max_song_per_playlist: usize,
    pub automatic_shuffle: bool,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_song_duration: Duration::ZERO,
            max_song_per_playlist: 0,
            automatic_shuffle: false,
        }
    }
}

/// Result of a playlist submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaylistAdded {
    pub added: usize,
    /// Tracks beyond `max_song_per_playlist`
    pub dropped: usize,
    /// Tracks rejected for exceeding `max_song_duration`
    pub too_long: usize,
}

#[derive(Debug)]
struct QueueInner {
    items: VecDeque<Track>,
    limits: QueueLimits,
}

impl QueueInner {
    fn playlist_count(&self, playlist_id: &str) -> usize {
        self.items
            .iter()
            .filter(|t| t.playlist_id() == Some(playlist_id))
            .count()
    }

    fn shuffle(&mut self) {
        let items = self.items.make_contiguous();
        items.shuffle(&mut rand::thread_rng());
    }
}

/// Pending songs, FIFO unless shuffled.
///
/// Every operation takes the internal lock once, so concurrent commands never
/// observe or produce a half-applied change.
#[derive(Debug)]
pub struct SongQueue {
    inner: Mutex<QueueInner>,
}

impl SongQueue {
    pub fn new(limits: QueueLimits) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                limits,
            }),
        }
    }

    pub fn limits(&self) -> QueueLimits {
        self.inner.lock().limits
    }

    pub fn set_limits(&self, limits: QueueLimits) {
        self.inner.lock().limits = limits;
    }

    /// Agrega una canción al final de la cola
    pub fn enqueue(&self, track: Track) -> DjResult<()> {
        let mut queue = self.inner.lock();
        let limits = queue.limits;

        track.check_duration(limits.max_song_duration)?;

        if let Some(playlist_id) = track.playlist_id() {
            if limits.max_song_per_playlist > 0
                && queue.playlist_count(playlist_id) >= limits.max_song_per_playlist
            {
                return Err(DjError::PlaylistFull {
                    limit: limits.max_song_per_playlist,
                });
            }
        }

        info!("➕ Agregado a la cola: {} ({})", track.title, track.submitter);
        queue.items.push_back(track);

        if limits.automatic_shuffle {
            queue.shuffle();
        }
        Ok(())
    }

    /// Agrega las canciones de una playlist de una sola vez.
    ///
    /// At most `max_song_per_playlist` tracks of the playlist end up in the
    /// queue; the rest are counted in [`PlaylistAdded::dropped`].
    pub fn enqueue_playlist(&self, playlist: PlaylistInfo, tracks: Vec<Track>) -> PlaylistAdded {
        let mut queue = self.inner.lock();
        let limits = queue.limits;

        let room = if limits.max_song_per_playlist == 0 {
            usize::MAX
        } else {
            limits
                .max_song_per_playlist
                .saturating_sub(queue.playlist_count(&playlist.id))
        };

        let mut result = PlaylistAdded::default();
        for track in tracks {
            if track.check_duration(limits.max_song_duration).is_err() {
                result.too_long += 1;
                continue;
            }
            if result.added >= room {
                result.dropped += 1;
                continue;
            }
            queue.items.push_back(track.with_playlist(playlist.clone()));
            result.added += 1;
        }

        info!(
            "➕ Playlist «{}»: {} agregadas, {} descartadas por límite, {} demasiado largas",
            playlist.title, result.added, result.dropped, result.too_long
        );

        if limits.automatic_shuffle && result.added > 0 {
            queue.shuffle();
        }
        result
    }

    /// Saca la siguiente canción (FIFO)
    pub fn dequeue(&self) -> Option<Track> {
        let next = self.inner.lock().items.pop_front();
        match &next {
            Some(track) => debug!("➡️ Siguiente en cola: {}", track.title),
            None => debug!("📭 Cola vacía"),
        }
        next
    }

    pub fn peek(&self) -> Option<Track> {
        self.inner.lock().items.front().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Mezcla toda la cola. The playing track is not part of the queue.
    pub fn shuffle(&self) {
        self.inner.lock().shuffle();
        info!("🔀 Cola mezclada");
    }

    pub fn set_automatic_shuffle(&self, enabled: bool) {
        self.inner.lock().limits.automatic_shuffle = enabled;
        if enabled {
            info!("🔀 Mezcla automática activada");
        } else {
            info!("➡️ Mezcla automática desactivada");
        }
    }

    pub fn automatic_shuffle(&self) -> bool {
        self.inner.lock().limits.automatic_shuffle
    }

    /// Quita todas las canciones de un usuario
    pub fn remove_by_submitter(&self, submitter: &str) -> usize {
        self.remove_where(|t| t.submitter == submitter)
    }

    /// Quita todas las canciones de una playlist
    pub fn remove_by_playlist(&self, playlist_id: &str) -> usize {
        self.remove_where(|t| t.playlist_id() == Some(playlist_id))
    }

    pub fn clear(&self) -> usize {
        let mut queue = self.inner.lock();
        let cleared = queue.items.len();
        queue.items.clear();
        info!("🗑️ Cola limpiada: {} canciones", cleared);
        cleared
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.inner.lock().items.iter().cloned().collect()
    }

    fn remove_where(&self, predicate: impl Fn(&Track) -> bool) -> usize {
        let mut queue = self.inner.lock();
        let original_len = queue.items.len();
        queue.items.retain(|t| !predicate(t));

        let removed = original_len - queue.items.len();
        if removed > 0 {
            info!("🗑️ Eliminadas {} canciones de la cola", removed);
        }
        removed
    }
}
