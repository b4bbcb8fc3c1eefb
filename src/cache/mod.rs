//! # Cache Module
//!
//! On-disk cache of downloaded songs for Open DJ.
//!
//! Every song is downloaded once into the cache directory as `<track id>.m4a`
//! and reused while the file is still around. The cache is reference counted:
//! the song that is playing and the prefetched next song hold a reference on
//! their files, and referenced files are never deleted.
//!
//! ## Features
//!
//! - **Size bound**: idle files are evicted least-recently-used first when a
//!   new download would push the cache over `maximum_size`
//! - **Expiry**: [`AudioCache::sweep`] deletes idle files older than
//!   `expire_time`, once per playback transition and from the hourly
//!   maintenance task
//! - **Restart friendly**: [`AudioCache::open`] registers the files already in
//!   the directory, so a restart does not throw the downloads away. A
//!   disabled cache deletes them instead
//! - **Leases**: [`CacheLease`] releases its reference when dropped
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! maximum_size = 536870912   # bytes
//! expire_time = 86400        # seconds
//! directory = "/app/cache"
//! ```
//!
//! With `enabled = false` nothing is retained: every song is deleted as soon
//! as it stops playing.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_dj::cache::{AudioCache, CacheSettings};
//! use std::sync::Arc;
//!
//! # fn example(track: &open_dj::audio::track::Track) -> anyhow::Result<()> {
//! let cache = Arc::new(AudioCache::open("/app/cache", CacheSettings::default())?);
//!
//! match cache.acquire_lease(track) {
//!     Some(lease) => println!("Ya descargada: {}", lease.path().display()),
//!     None => println!("Hay que descargarla"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod audio_cache;

pub use audio_cache::{audio_path, partial_path, AudioCache, CacheEntry, CacheLease, CacheSettings};
#[cfg(test)]
pub(crate) use audio_cache::partial_files;
