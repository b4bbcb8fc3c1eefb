use chrono::{DateTime, Utc};
use std::{fmt, time::Duration};

use crate::error::{DjError, DjResult};

/// Playlist a track was submitted with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistInfo {
    pub id: String,
    pub title: String,
}

/// A queued or playing song.
///
/// `id` comes from the source (for yt-dlp, the video id) and doubles as the
/// cache key, so it is restricted to characters that are safe in file names.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: String,
    pub url: String,
    pub title: String,
    pub duration: Duration,
    pub submitter: String,
    pub comment: Option<String>,
    pub playlist: Option<PlaylistInfo>,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(
        id: impl AsRef<str>,
        url: impl Into<String>,
        title: impl Into<String>,
        duration: Duration,
        submitter: impl Into<String>,
    ) -> Self {
        Self {
            id: sanitize_id(id.as_ref()),
            url: url.into(),
            title: title.into(),
            duration,
            submitter: submitter.into(),
            comment: None,
            playlist: None,
            added_at: Utc::now(),
        }
    }

    pub fn with_playlist(mut self, playlist: PlaylistInfo) -> Self {
        self.playlist = Some(playlist);
        self
    }

    pub fn playlist_id(&self) -> Option<&str> {
        self.playlist.as_ref().map(|p| p.id.as_str())
    }

    /// Rejects the track when it is longer than `limit`. A zero limit disables
    /// the check.
    pub fn check_duration(&self, limit: Duration) -> DjResult<()> {
        if !limit.is_zero() && self.duration > limit {
            return Err(DjError::TrackTooLong {
                title: self.title.clone(),
                duration: self.duration,
                limit,
            });
        }
        Ok(())
    }

    /// True when both tracks belong to the same playlist submission.
    pub fn same_playlist(&self, other: &Track) -> bool {
        matches!((self.playlist_id(), other.playlist_id()), (Some(a), Some(b)) if a == b)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "«{}» ({}) añadida por {}",
            self.title,
            format_clock(self.duration),
            self.submitter
        )
    }
}

/// Formats a duration as `m:ss` or `h:mm:ss`.
pub fn format_clock(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Keeps `[A-Za-z0-9_-]`, replacing anything else with `_`.
pub fn sanitize_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_file_name_safe() {
        let track = Track::new("abc/../d e", "https://x", "t", Duration::ZERO, "ana");
        assert_eq!(track.id, "abc____d_e");
        assert_eq!(sanitize_id(""), "_");
        assert_eq!(sanitize_id("dQw4w9WgXcQ"), "dQw4w9WgXcQ");
    }

    #[test]
    fn test_clock_format() {
        assert_eq!(format_clock(Duration::from_secs(59)), "0:59");
        assert_eq!(format_clock(Duration::from_secs(212)), "3:32");
        assert_eq!(format_clock(Duration::from_secs(3725)), "1:02:05");
    }

    #[test]
    fn test_duration_limit() {
        let track = Track::new("a", "u", "A", Duration::from_secs(600), "ana");
        assert!(track.check_duration(Duration::ZERO).is_ok());
        assert!(track.check_duration(Duration::from_secs(600)).is_ok());
        assert!(matches!(
            track.check_duration(Duration::from_secs(599)),
            Err(DjError::TrackTooLong { .. })
        ));
    }

    #[test]
    fn test_same_playlist() {
        let list = PlaylistInfo {
            id: "PL1".into(),
            title: "Mix".into(),
        };
        let a = Track::new("a", "u", "A", Duration::ZERO, "ana").with_playlist(list.clone());
        let b = Track::new("b", "u", "B", Duration::ZERO, "bob").with_playlist(list);
        let c = Track::new("c", "u", "C", Duration::ZERO, "bob");
        assert!(a.same_playlist(&b));
        assert!(!a.same_playlist(&c));
        assert!(!c.same_playlist(&c));
    }
}
