//! # Sources
//!
//! Turning a URL from chat into something playable happens in two steps:
//!
//! 1. [`TrackResolver::resolve`] looks up the metadata (title, duration, id) of
//!    a single song or of every song of a playlist. This runs while the `add`
//!    command is being handled.
//! 2. [`AudioFetcher::fetch`] downloads the audio of one song. The playback
//!    task drives it through [`downloader::Downloader`], which adds the
//!    duration check, cancellation, the timeout and partial-file cleanup.
//!
//! The only backend is [`ytdlp::YtDlpClient`], which implements both traits.

pub mod downloader;
pub mod ytdlp;

use async_trait::async_trait;
use std::path::Path;

use crate::{
    audio::track::{PlaylistInfo, Track},
    error::DjResult,
};

pub use downloader::{Downloader, FetchedAudio};
pub use ytdlp::YtDlpClient;

/// Result of resolving a URL.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Track(Track),
    Playlist {
        playlist: PlaylistInfo,
        tracks: Vec<Track>,
    },
}

/// Looks up song metadata for a URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, url: &str, submitter: &str) -> DjResult<Resolved>;
}

/// Downloads the audio of a song.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioFetcher: Send + Sync {
    /// Writes the audio of `track` to exactly `destination`.
    ///
    /// Dropping the returned future must stop the download.
    async fn fetch(&self, track: &Track, destination: &Path) -> DjResult<()>;
}
