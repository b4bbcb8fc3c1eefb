//! # Audio Module
//!
//! Queue, skip votes and the playback state machine of Open DJ.
//!
//! ## Architecture
//!
//! ### [`controller`] - Playback Controller
//! - Owns the queue and the skip votes
//! - Runs one long-lived task that fetches, plays and advances
//! - Prefetches the next song while the current one plays
//! - Publishes its state on a `watch` channel and [`PlaybackEvent`]s on a
//!   `broadcast` channel
//!
//! ### [`queue`] - Song Queue
//! - FIFO with manual and automatic shuffle
//! - Duration and per-playlist limits checked on enqueue
//! - Bulk removal by submitter or playlist
//!
//! ### [`votes`] - Skip Votes
//! - One vote record for the playing song and one for its playlist
//! - Threshold computed against the listener count at vote time
//!
//! ### [`engine`] - Collaborators
//! - [`AudioEngine`]: plays files, reports completion once per playback
//! - [`VoiceChannel`]: listener count and channel moves
//!
//! ## State Machine
//!
//! ```text
//!   Idle ──advance──▶ Fetching ──ok──▶ Playing ──finished──┐
//!    ▲                  │  ▲              │                 │
//!    │             error│  └──────────────┼─────────────────┘
//!    │                  ▼                 ▼ skip
//!    └──queue empty── (next)          Stopping ──▶ (next)
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_dj::audio::{controller::PlaybackController, track::Track};
//! use std::time::Duration;
//!
//! # async fn example(controller: std::sync::Arc<PlaybackController>) -> anyhow::Result<()> {
//! controller.start();
//! controller.enqueue(Track::new(
//!     "dQw4w9WgXcQ",
//!     "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
//!     "Never Gonna Give You Up",
//!     Duration::from_secs(212),
//!     "ana",
//! ))?;
//!
//! let tally = controller.skip("bob", false).await?;
//! println!("Votos: {}/{}", tally.votes, tally.required);
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod engine;
pub mod queue;
pub mod track;
pub mod votes;

pub use controller::{PlaybackController, PlaybackEvent, PlaybackSettings, PlaybackState, VolumeSettings};
pub use engine::{AudioEngine, VoiceChannel};
