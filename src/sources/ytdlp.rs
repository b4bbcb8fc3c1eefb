use async_trait::async_trait;
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{AudioFetcher, Resolved, TrackResolver};
use crate::{
    audio::track::{PlaylistInfo, Track},
    error::{DjError, DjResult},
};

const RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolver y descargador basado en yt-dlp.
///
/// Metadata comes from `yt-dlp -J --flat-playlist`, so resolving a playlist
/// is a single request no matter how many entries it has. Audio is downloaded
/// as m4a when the source offers it.
#[derive(Debug, Clone)]
pub struct YtDlpClient {
    binary: String,
    cookies: Option<PathBuf>,
}

impl YtDlpClient {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            cookies: None,
        }
    }

    /// Crea el cliente y busca un archivo de cookies en las rutas habituales.
    pub async fn detect(binary: impl Into<String>) -> Self {
        let mut client = Self::new(binary);
        client.cookies = find_cookies_file().await;
        client
    }

    /// Verifica que yt-dlp y ffmpeg estén disponibles
    pub async fn verify_dependencies(&self) -> anyhow::Result<()> {
        match Command::new(&self.binary).arg("--version").output().await {
            Ok(output) if output.status.success() => {
                let version = String::from_utf8_lossy(&output.stdout);
                info!("✅ yt-dlp versión: {}", version.trim());
            }
            _ => {
                error!("❌ yt-dlp no encontrado. Instala con: pip install yt-dlp");
                anyhow::bail!("yt-dlp no disponible ({})", self.binary);
            }
        }

        // ffmpeg hace falta para remux cuando la fuente no ofrece m4a
        match Command::new("ffmpeg").arg("-version").output().await {
            Ok(output) if output.status.success() => info!("✅ ffmpeg disponible"),
            _ => warn!("⚠️ ffmpeg no encontrado, algunas fuentes podrían fallar"),
        }

        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.kill_on_drop(true)
            .stdin(Stdio::null())
            .args(["--no-warnings", "--socket-timeout", "30"]);
        if let Some(cookies) = &self.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd
    }
}

#[async_trait]
impl TrackResolver for YtDlpClient {
    async fn resolve(&self, url: &str, submitter: &str) -> DjResult<Resolved> {
        let parsed = Url::parse(url).map_err(|e| DjError::InvalidArgument(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DjError::InvalidArgument(format!("{url}: solo se admiten enlaces http(s)")));
        }

        debug!("🔍 Resolviendo {}", url);
        let mut cmd = self.command();
        cmd.args(["-J", "--flat-playlist"]).arg(url);

        let output = tokio::time::timeout(RESOLVE_TIMEOUT, cmd.output())
            .await
            .map_err(|_| DjError::fetch(url, "tiempo agotado consultando yt-dlp"))?
            .map_err(|e| DjError::fetch(url, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DjError::fetch(url, stderr.trim()));
        }

        parse_metadata(&output.stdout, url, submitter)
    }
}

#[async_trait]
impl AudioFetcher for YtDlpClient {
    async fn fetch(&self, track: &Track, destination: &Path) -> DjResult<()> {
        let mut cmd = self.command();
        cmd.args([
            "-f",
            "bestaudio[ext=m4a]/bestaudio",
            "--no-playlist",
            "--no-part",
            "--force-overwrites",
            "--quiet",
            "-o",
        ])
        .arg(destination)
        .arg(&track.url)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

        // kill_on_drop mata el proceso si se cancela la descarga
        let output = cmd.output().await.map_err(|e| DjError::fetch(&track.title, e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DjError::fetch(&track.title, stderr.trim()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "_type", default)]
    kind: Option<String>,
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    entries: Vec<Metadata>,
}

impl Metadata {
    fn into_track(self, fallback_url: &str, submitter: &str) -> Track {
        let url = self
            .webpage_url
            .or(self.url)
            .unwrap_or_else(|| fallback_url.to_string());
        let duration = self
            .duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or_default();
        let title = self.title.unwrap_or_else(|| self.id.clone());
        Track::new(&self.id, url, title, duration, submitter)
    }
}

fn parse_metadata(json: &[u8], url: &str, submitter: &str) -> DjResult<Resolved> {
    let metadata: Metadata = serde_json::from_slice(json)
        .map_err(|e| DjError::fetch(url, format!("respuesta de yt-dlp inválida: {e}")))?;

    if metadata.kind.as_deref() != Some("playlist") {
        return Ok(Resolved::Track(metadata.into_track(url, submitter)));
    }

    let playlist = PlaylistInfo {
        title: metadata.title.clone().unwrap_or_else(|| metadata.id.clone()),
        id: metadata.id,
    };
    let tracks: Vec<Track> = metadata
        .entries
        .into_iter()
        .map(|entry| entry.into_track(url, submitter).with_playlist(playlist.clone()))
        .collect();

    if tracks.is_empty() {
        return Err(DjError::fetch(&playlist.title, "la playlist está vacía"));
    }
    info!("📋 Playlist «{}»: {} canciones", playlist.title, tracks.len());
    Ok(Resolved::Playlist { playlist, tracks })
}

/// Busca archivo de cookies disponible
async fn find_cookies_file() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("/app/.config/yt-dlp/cookies.txt"),
        PathBuf::from("./cookies.txt"),
    ];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.insert(0, PathBuf::from(home).join(".config/yt-dlp/cookies.txt"));
    }

    for path in candidates {
        if tokio::fs::metadata(&path).await.is_ok() {
            info!("🍪 Cookies encontradas en: {}", path.display());
            return Some(path);
        }
    }

    debug!("🍪 No se encontraron cookies");
    None
}
