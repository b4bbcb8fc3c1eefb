//! Error types for the DJ core.
//!
//! The playback core reports every failure through [`DjError`]. None of these
//! errors stop the playback loop: validation and permission errors go back to
//! the user who issued the command, fetch and engine errors skip the track.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DjError {
    /// La canción supera `max_song_duration`
    #[error("«{title}» dura {}, el máximo permitido es {}", human(.duration), human(.limit))]
    TrackTooLong {
        title: String,
        duration: Duration,
        limit: Duration,
    },

    /// Ya hay `max_song_per_playlist` canciones de esa playlist en la cola
    #[error("la playlist ya tiene {limit} canciones en la cola")]
    PlaylistFull { limit: usize },

    /// Argumento de comando inválido (URL mal formada, volumen no numérico...)
    #[error("argumento inválido: {0}")]
    InvalidArgument(String),

    /// Fallo de red o de yt-dlp al resolver o descargar
    #[error("no se pudo obtener «{title}»: {reason}")]
    Fetch { title: String, reason: String },

    /// La descarga se canceló porque la canción salió de la cola o se saltó
    #[error("descarga cancelada")]
    Cancelled,

    /// Error de disco en el caché
    #[error("error de E/S en el caché: {0}")]
    CacheIo(#[from] std::io::Error),

    /// El usuario no tiene permiso para el comando
    #[error("{user} no tiene permiso para usar «{command}»")]
    Permission { user: String, command: String },

    /// El motor de audio no pudo iniciar la reproducción
    #[error("error del motor de audio: {0}")]
    Engine(String),

    /// Error del cliente de voz (mover de canal, canal inexistente...)
    #[error("error del canal de voz: {0}")]
    Channel(String),

    #[error("no hay ninguna canción sonando")]
    NothingPlaying,
}

impl DjError {
    pub fn fetch(title: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            title: title.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors caused by the request itself; no state changed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::TrackTooLong { .. } | Self::PlaylistFull { .. } | Self::InvalidArgument(_)
        )
    }
}

pub type DjResult<T> = Result<T, DjError>;

fn human(duration: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(DjError::PlaylistFull { limit: 3 }.is_validation());
        assert!(DjError::InvalidArgument("x".into()).is_validation());
        assert!(!DjError::Cancelled.is_validation());
        assert!(!DjError::fetch("song", "timeout").is_validation());
        assert!(!DjError::Engine("gone".into()).is_validation());
    }

    #[test]
    fn test_too_long_message_uses_human_durations() {
        let err = DjError::TrackTooLong {
            title: "Largo".into(),
            duration: Duration::from_secs(3720),
            limit: Duration::from_secs(3600),
        };
        assert_eq!(err.to_string(), "«Largo» dura 1h 2m, el máximo permitido es 1h");
    }
}
