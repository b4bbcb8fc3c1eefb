use parking_lot::Mutex;
use std::{
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AudioFetcher;
use crate::{
    audio::track::Track,
    cache::{audio_path, partial_path},
    error::{DjError, DjResult},
};

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Downloads songs into a directory, one file per track id.
///
/// The backend writes into a hidden `.part` file that is renamed once the
/// download completes. Every attempt gets its own `.part` file, so an aborted
/// download never touches the file of a newer one for the same song. A
/// cancelled, failed or timed out download never leaves its file behind.
pub struct Downloader {
    fetcher: Arc<dyn AudioFetcher>,
    max_song_duration: Mutex<Duration>,
    fetch_timeout: Duration,
    attempts: AtomicU64,
}

impl Downloader {
    pub fn new(fetcher: Arc<dyn AudioFetcher>, max_song_duration: Duration, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            max_song_duration: Mutex::new(max_song_duration),
            fetch_timeout,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn set_max_song_duration(&self, limit: Duration) {
        *self.max_song_duration.lock() = limit;
    }

    /// Descarga `track` en `dest_dir`.
    ///
    /// Fails fast with a validation error when the song is too long. Returns
    /// [`DjError::Cancelled`] as soon as `cancel` fires.
    pub async fn fetch(
        &self,
        track: &Track,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> DjResult<FetchedAudio> {
        let limit = *self.max_song_duration.lock();
        track.check_duration(limit)?;

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
        let partial = partial_path(dest_dir, &track.id, attempt);
        let destination = audio_path(dest_dir, &track.id);
        info!("⬇️ Descargando: {}", track.title);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DjError::Cancelled),
            result = tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(track, &partial)) => {
                result.unwrap_or_else(|_| {
                    Err(DjError::fetch(
                        &track.title,
                        format!(
                            "tiempo agotado tras {}",
                            humantime::format_duration(self.fetch_timeout)
                        ),
                    ))
                })
            }
        };

        if let Err(e) = outcome {
            match &e {
                DjError::Cancelled => debug!("🚫 Descarga cancelada: {}", track.title),
                other => warn!("❌ Descarga fallida: {}", other),
            }
            discard_partial(&partial).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&partial, &destination).await {
            discard_partial(&partial).await;
            return Err(DjError::fetch(&track.title, e));
        }

        let size_bytes = tokio::fs::metadata(&destination).await?.len();
        info!("✅ Descargada: {} ({} bytes)", track.title, size_bytes);
        Ok(FetchedAudio {
            path: destination,
            size_bytes,
        })
    }
}

async fn discard_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("🗑️ Descarga parcial eliminada: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️ No se pudo eliminar {}: {}", path.display(), e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{cache::partial_files, sources::MockAudioFetcher};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    /// Fetcher that writes a fixed payload, fails on demand, or hangs after
    /// writing half the file.
    pub(crate) enum FakeFetcher {
        Writes(Vec<u8>),
        Fails,
        Hangs,
    }

    #[async_trait]
    impl AudioFetcher for FakeFetcher {
        async fn fetch(&self, track: &Track, destination: &Path) -> DjResult<()> {
            match self {
                Self::Writes(bytes) => {
                    tokio::fs::write(destination, bytes).await?;
                    Ok(())
                }
                Self::Fails => {
                    tokio::fs::write(destination, b"half").await?;
                    Err(DjError::fetch(&track.title, "HTTP 403"))
                }
                Self::Hangs => {
                    tokio::fs::write(destination, b"half").await?;
                    std::future::pending().await
                }
            }
        }
    }

    /// First call hangs; later calls write their file and wait for `gate`.
    #[derive(Default)]
    struct GatedFetcher {
        calls: AtomicUsize,
        gate: Notify,
    }

    #[async_trait]
    impl AudioFetcher for GatedFetcher {
        async fn fetch(&self, _track: &Track, destination: &Path) -> DjResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(destination, vec![call as u8; 16]).await?;
            if call == 0 {
                std::future::pending::<()>().await;
            }
            self.gate.notified().await;
            Ok(())
        }
    }

    async fn wait_for_partials(dir: &Path, count: usize) {
        for _ in 0..200 {
            if partial_files(dir, "abc").len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn track(seconds: u64) -> Track {
        Track::new("abc", "https://example.com/abc", "Canción", Duration::from_secs(seconds), "ana")
    }

    fn downloader(fetcher: impl AudioFetcher + 'static) -> Downloader {
        Downloader::new(Arc::new(fetcher), Duration::from_secs(600), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_successful_fetch_lands_in_final_path() {
        let dir = TempDir::new().unwrap();
        let downloader = downloader(FakeFetcher::Writes(vec![7; 32]));

        let fetched = downloader
            .fetch(&track(60), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetched.path, dir.path().join("abc.m4a"));
        assert_eq!(fetched.size_bytes, 32);
        assert!(partial_files(dir.path(), "abc").is_empty());
    }

    #[tokio::test]
    async fn test_failure_removes_partial_file() {
        let dir = TempDir::new().unwrap();
        let downloader = downloader(FakeFetcher::Fails);

        let err = downloader
            .fetch(&track(60), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DjError::Fetch { .. }));
        assert!(partial_files(dir.path(), "abc").is_empty());
        assert!(!audio_path(dir.path(), "abc").exists());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let downloader = Arc::new(downloader(FakeFetcher::Hangs));
        let cancel = CancellationToken::new();

        let task = {
            let downloader = downloader.clone();
            let cancel = cancel.clone();
            let dir = dir.path().to_path_buf();
            tokio::spawn(async move { downloader.fetch(&track(60), &dir, &cancel).await })
        };

        wait_for_partials(dir.path(), 1).await;
        cancel.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(DjError::Cancelled)));
        assert!(partial_files(dir.path(), "abc").is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_download_spares_a_newer_one_of_the_same_song() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(GatedFetcher::default());
        let downloader = Arc::new(Downloader::new(
            fetcher.clone(),
            Duration::from_secs(600),
            Duration::from_secs(5),
        ));
        let spawn_fetch = |cancel: CancellationToken| {
            let downloader = downloader.clone();
            let dir = dir.path().to_path_buf();
            tokio::spawn(async move { downloader.fetch(&track(60), &dir, &cancel).await })
        };

        let stale_cancel = CancellationToken::new();
        let stale = spawn_fetch(stale_cancel.clone());
        wait_for_partials(dir.path(), 1).await;
        let fresh = spawn_fetch(CancellationToken::new());
        wait_for_partials(dir.path(), 2).await;

        stale_cancel.cancel();
        assert!(matches!(stale.await.unwrap(), Err(DjError::Cancelled)));
        assert_eq!(partial_files(dir.path(), "abc").len(), 1);

        fetcher.gate.notify_one();
        let fetched = fresh.await.unwrap().unwrap();
        assert_eq!(fetched.size_bytes, 16);
        assert_eq!(std::fs::read(&fetched.path).unwrap(), vec![1u8; 16]);
        assert!(partial_files(dir.path(), "abc").is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_a_fetch_error() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(
            Arc::new(FakeFetcher::Hangs),
            Duration::ZERO,
            Duration::from_millis(20),
        );

        let err = downloader
            .fetch(&track(60), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DjError::Fetch { .. }));
        assert!(partial_files(dir.path(), "abc").is_empty());
    }

    #[tokio::test]
    async fn test_long_tracks_are_rejected_before_fetching() {
        let dir = TempDir::new().unwrap();
        let mut fetcher = MockAudioFetcher::new();
        fetcher.expect_fetch().never();
        let downloader = downloader(fetcher);

        let err = downloader
            .fetch(&track(601), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
