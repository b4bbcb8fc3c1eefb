use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::{audio::track::Track, error::DjResult};

/// Extension of finished downloads.
pub const AUDIO_EXTENSION: &str = "m4a";
/// Extension of downloads still in progress.
pub const PARTIAL_EXTENSION: &str = "part";

/// Cache limits, taken from the `[cache]` section of the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheSettings {
    pub enabled: bool,
    /// Límite total en bytes (orientativo: una canción grande nunca se rechaza)
    pub maximum_size: u64,
    pub expire_time: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            maximum_size: 512 * 1024 * 1024,
            expire_time: Duration::from_secs(24 * 3600),
        }
    }
}

/// A downloaded audio file on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub last_accessed: DateTime<Utc>,
    /// Queue or playback slots currently using the file
    pub ref_count: usize,
}

#[derive(Debug)]
struct CacheState {
    settings: CacheSettings,
    entries: HashMap<String, CacheEntry>,
    total_size: u64,
}

impl CacheState {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    /// Evicts idle entries, least recently used first, until `incoming` more
    /// bytes fit under the limit or nothing idle is left.
    fn make_room(&mut self, incoming: u64, keep: &str) -> Vec<PathBuf> {
        let mut evicted = Vec::new();
        while self.total_size + incoming > self.settings.maximum_size {
            let oldest = self
                .entries
                .values()
                .filter(|e| e.ref_count == 0 && e.key != keep)
                .min_by_key(|e| e.last_accessed)
                .map(|e| e.key.clone());

            let Some(key) = oldest else {
                debug!("💾 Sin entradas libres para desalojar, el caché supera el límite");
                break;
            };
            if let Some(entry) = self.remove(&key) {
                debug!("🗑️ Desalojado del caché: {} ({} bytes)", entry.key, entry.size_bytes);
                evicted.push(entry.path);
            }
        }
        evicted
    }

    /// Removes every entry nobody is using and returns their paths.
    fn take_idle(&mut self) -> Vec<PathBuf> {
        let keys: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.ref_count == 0)
            .map(|e| e.key.clone())
            .collect();
        keys.iter()
            .filter_map(|k| self.remove(k))
            .map(|e| e.path)
            .collect()
    }
}

/// Reference-counted store of downloaded songs, keyed by track id.
///
/// Files in use (`ref_count > 0`) are never deleted. Idle files stay on disk
/// for reuse until they expire, get evicted for space, or are purged. When the
/// cache is disabled, files are deleted as soon as the last user releases them.
///
/// File deletion happens outside the lock and failures are only logged: a
/// broken cache degrades to download-play-delete, it never blocks playback.
#[derive(Debug)]
pub struct AudioCache {
    dir: PathBuf,
    state: Mutex<CacheState>,
}

impl AudioCache {
    /// Opens the cache directory, registering audio left by earlier runs and
    /// deleting unfinished downloads. With caching disabled, old audio is
    /// deleted too.
    pub fn open(dir: impl Into<PathBuf>, settings: CacheSettings) -> DjResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut entries = HashMap::new();
        let mut total_size = 0;
        for item in fs::read_dir(&dir)? {
            let path = match item {
                Ok(item) => item.path(),
                Err(e) => {
                    warn!("⚠️ Entrada ilegible en el caché: {}", e);
                    continue;
                }
            };

            match path.extension().and_then(|e| e.to_str()) {
                Some(PARTIAL_EXTENSION) => remove_file_logged(&path),
                Some(AUDIO_EXTENSION) if !settings.enabled => remove_file_logged(&path),
                Some(AUDIO_EXTENSION) => {
                    let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let metadata = match fs::metadata(&path) {
                        Ok(metadata) => metadata,
                        Err(e) => {
                            warn!("⚠️ No se pudo leer {}: {}", path.display(), e);
                            continue;
                        }
                    };
                    let last_accessed = metadata
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now());

                    total_size += metadata.len();
                    entries.insert(
                        key.to_string(),
                        CacheEntry {
                            key: key.to_string(),
                            path: path.clone(),
                            size_bytes: metadata.len(),
                            last_accessed,
                            ref_count: 0,
                        },
                    );
                }
                _ => {}
            }
        }

        info!(
            "📁 Caché de audio en {}: {} archivos, {} bytes",
            dir.display(),
            entries.len(),
            total_size
        );

        Ok(Self {
            dir,
            state: Mutex::new(CacheState {
                settings,
                entries,
                total_size,
            }),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Final location of a track's audio.
    pub fn path_for(&self, key: &str) -> PathBuf {
        audio_path(&self.dir, key)
    }

    pub fn settings(&self) -> CacheSettings {
        self.state.lock().settings
    }

    /// Applies new limits, evicting right away if the size limit shrank.
    /// Disabling the cache deletes every idle file.
    pub fn apply_settings(&self, settings: CacheSettings) {
        let evicted = {
            let mut state = self.state.lock();
            state.settings = settings;
            if settings.enabled {
                state.make_room(0, "")
            } else {
                state.take_idle()
            }
        };
        remove_files(evicted);
    }

    /// Returns the cached file for `track`, taking a reference on it.
    pub fn acquire(&self, track: &Track) -> Option<PathBuf> {
        let mut state = self.state.lock();
        if !state.settings.enabled {
            return None;
        }

        let path = state.entries.get(&track.id)?.path.clone();
        if !path.exists() {
            warn!("⚠️ {} desapareció del disco, se descargará de nuevo", path.display());
            state.remove(&track.id);
            return None;
        }

        let entry = state.entries.get_mut(&track.id)?;
        entry.ref_count += 1;
        entry.last_accessed = Utc::now();
        debug!("✅ Cache hit: {} (refs: {})", track.title, entry.ref_count);
        Some(path)
    }

    /// Registers a finished download with one reference held by the caller.
    pub fn insert(&self, track: &Track, path: PathBuf, size_bytes: u64) {
        let evicted = {
            let mut state = self.state.lock();

            if let Some(entry) = state.entries.get_mut(&track.id) {
                entry.ref_count += 1;
                entry.last_accessed = Utc::now();
                let previous_size = std::mem::replace(&mut entry.size_bytes, size_bytes);
                entry.path = path;
                state.total_size = state.total_size.saturating_sub(previous_size) + size_bytes;
                return;
            }

            let evicted = state.make_room(size_bytes, &track.id);
            state.entries.insert(
                track.id.clone(),
                CacheEntry {
                    key: track.id.clone(),
                    path,
                    size_bytes,
                    last_accessed: Utc::now(),
                    ref_count: 1,
                },
            );
            state.total_size += size_bytes;
            debug!("💾 Guardado en caché: {} ({} bytes)", track.title, size_bytes);
            evicted
        };
        remove_files(evicted);
    }

    /// Drops one reference. Idle entries stay on disk unless caching is off.
    pub fn release(&self, key: &str) {
        let doomed = {
            let mut state = self.state.lock();
            let enabled = state.settings.enabled;
            let Some(entry) = state.entries.get_mut(key) else {
                debug!("Release de una entrada desconocida: {}", key);
                return;
            };

            entry.ref_count = entry.ref_count.saturating_sub(1);
            entry.last_accessed = Utc::now();
            if entry.ref_count == 0 && !enabled {
                state.remove(key).map(|e| e.path)
            } else {
                None
            }
        };

        if let Some(path) = doomed {
            remove_file_logged(&path);
        }
    }

    /// Deletes idle entries older than `expire_time`. Does nothing while
    /// caching is disabled.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub(crate) fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let expired = {
            let mut state = self.state.lock();
            if !state.settings.enabled {
                return 0;
            }

            let ttl = chrono::Duration::from_std(state.settings.expire_time)
                .unwrap_or_else(|_| chrono::Duration::days(36_500));
            let keys: Vec<String> = state
                .entries
                .values()
                .filter(|e| e.ref_count == 0 && now.signed_duration_since(e.last_accessed) > ttl)
                .map(|e| e.key.clone())
                .collect();

            let paths: Vec<PathBuf> = keys
                .iter()
                .filter_map(|k| state.remove(k))
                .map(|e| e.path)
                .collect();
            paths
        };

        let removed = expired.len();
        if removed > 0 {
            info!("🧹 Caché: {} archivos expirados eliminados", removed);
        }
        remove_files(expired);
        removed
    }

    /// Deletes every idle entry.
    pub fn purge(&self) -> usize {
        let idle = self.state.lock().take_idle();

        let removed = idle.len();
        info!("🗑️ Caché purgado: {} archivos", removed);
        remove_files(idle);
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.state.lock().total_size
    }

    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).cloned()
    }

    /// Like [`acquire`](Self::acquire), wrapped in a lease that releases the
    /// reference when dropped.
    pub fn acquire_lease(self: &Arc<Self>, track: &Track) -> Option<CacheLease> {
        let path = self.acquire(track)?;
        Some(CacheLease {
            cache: self.clone(),
            key: track.id.clone(),
            path,
        })
    }

    /// Like [`insert`](Self::insert), wrapped in a lease.
    pub fn insert_lease(self: &Arc<Self>, track: &Track, path: PathBuf, size_bytes: u64) -> CacheLease {
        self.insert(track, path.clone(), size_bytes);
        CacheLease {
            cache: self.clone(),
            key: track.id.clone(),
            path,
        }
    }
}

/// One reference on a cache entry, released on drop.
#[derive(Debug)]
pub struct CacheLease {
    cache: Arc<AudioCache>,
    key: String,
    path: PathBuf,
}

impl CacheLease {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for CacheLease {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

/// `<dir>/<key>.m4a`
pub fn audio_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.{AUDIO_EXTENSION}"))
}

/// `<dir>/.<key>.<attempt>.part`, hidden until the download finishes. Each
/// attempt gets its own file, so two downloads of the same song never share one.
pub fn partial_path(dir: &Path, key: &str, attempt: u64) -> PathBuf {
    dir.join(format!(".{key}.{attempt}.{PARTIAL_EXTENSION}"))
}

/// Unfinished downloads of `key` currently in `dir`.
#[cfg(test)]
pub(crate) fn partial_files(dir: &Path, key: &str) -> Vec<PathBuf> {
    let prefix = format!(".{key}.");
    let suffix = format!(".{PARTIAL_EXTENSION}");
    let Ok(items) = fs::read_dir(dir) else {
        return Vec::new();
    };
    items
        .filter_map(|item| item.ok())
        .map(|item| item.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(&suffix))
        })
        .collect()
}

fn remove_files(paths: Vec<PathBuf>) {
    for path in paths {
        remove_file_logged(&path);
    }
}

pub(crate) fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("🗑️ Archivo eliminado: {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("⚠️ No se pudo eliminar {}: {}", path.display(), e),
    }
}
