use async_trait::async_trait;
use std::path::Path;
use tokio::sync::oneshot;

use crate::error::DjResult;

/// Fires once when a playback started with [`AudioEngine::start_playback`]
/// ends, whether it finished, was stopped or failed mid-stream. A dropped
/// sender counts as finished too.
pub type Completion = oneshot::Receiver<()>;

/// Plays audio files into the voice channel.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    /// Starts playing `path` at `volume` (0.0 - 1.0).
    async fn start_playback(&self, path: &Path, volume: f32) -> DjResult<Completion>;

    /// Stops the current playback. The pending [`Completion`] fires afterwards.
    async fn stop(&self);

    async fn set_volume(&self, volume: f32);
}

/// Membership of the voice channel the bot sits in.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceChannel: Send + Sync {
    /// Users in the channel, not counting the bot.
    async fn listener_count(&self) -> usize;

    async fn move_to_channel(&self, name: &str) -> DjResult<()>;
}
