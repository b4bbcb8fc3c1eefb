use anyhow::{Context, Result};
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{
    audio::{queue::QueueLimits, PlaybackSettings, VolumeSettings},
    cache::CacheSettings,
};

/// Default path of the optional TOML file, overridable with `DJ_CONFIG`.
pub const DEFAULT_CONFIG_FILE: &str = "open-dj.toml";

/// Bot configuration.
///
/// Loaded in layers, later ones winning:
///
/// 1. built-in defaults
/// 2. the TOML file named by `DJ_CONFIG` (default `open-dj.toml`), if present
/// 3. `DJ_<SECTION>__<KEY>` environment variables, e.g. `DJ_GENERAL__SKIP_RATIO=0.6`
///
/// `DISCORD_TOKEN` and `GUILD_ID` are honoured when the `discord` section
/// leaves them unset. A `.env` file is loaded first.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub general: GeneralConfig,
    pub cache: CacheConfig,
    pub volume: VolumeConfig,
    pub aliases: AliasConfig,
    pub permissions: PermissionConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub token: String,
    pub guild_id: u64,
    /// Voice channel joined at startup
    pub default_channel: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub command_prefix: String,
    pub skip_ratio: f32,
    pub playlist_skip_ratio: f32,
    /// Bot status shown while nothing plays
    pub default_comment: String,
    /// Seconds, 0 = no limit
    pub max_song_duration: u64,
    /// 0 = no limit
    pub max_song_per_playlist: usize,
    pub automatic_shuffle_on: bool,
    /// Seconds before a download is abandoned
    pub fetch_timeout: u64,
    pub ytdlp_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            command_prefix: "!".to_string(),
            skip_ratio: 0.5,
            playlist_skip_ratio: 0.5,
            default_comment: "Envía !help para ver los comandos".to_string(),
            max_song_duration: 3600,
            max_song_per_playlist: 50,
            automatic_shuffle_on: false,
            fetch_timeout: 300,
            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Bytes
    pub maximum_size: u64,
    /// Seconds
    pub expire_time: u64,
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            maximum_size: 512 * 1024 * 1024,
            expire_time: 24 * 3600,
            directory: "/app/cache".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VolumeConfig {
    pub default_volume: f32,
    pub lowest_volume: f32,
    pub highest_volume: f32,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            default_volume: 0.2,
            lowest_volume: 0.01,
            highest_volume: 0.8,
        }
    }
}

/// Command names as typed in chat, without the prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AliasConfig {
    pub add_alias: String,
    pub skip_alias: String,
    pub skip_playlist_alias: String,
    pub admin_skip_alias: String,
    pub admin_skip_playlist_alias: String,
    pub help_alias: String,
    pub volume_alias: String,
    pub move_alias: String,
    pub reload_alias: String,
    pub reset_alias: String,
    pub num_songs_alias: String,
    pub next_song_alias: String,
    pub current_song_alias: String,
    pub set_comment_alias: String,
    pub num_cached_alias: String,
    pub cache_size_alias: String,
    pub kill_alias: String,
    pub shuffle_alias: String,
    pub shuffle_on_alias: String,
    pub shuffle_off_alias: String,
}

impl Default for AliasConfig {
    fn default() -> Self {
        Self {
            add_alias: "add".into(),
            skip_alias: "skip".into(),
            skip_playlist_alias: "skipplaylist".into(),
            admin_skip_alias: "forceskip".into(),
            admin_skip_playlist_alias: "forceskipplaylist".into(),
            help_alias: "help".into(),
            volume_alias: "volume".into(),
            move_alias: "move".into(),
            reload_alias: "reload".into(),
            reset_alias: "reset".into(),
            num_songs_alias: "numsongs".into(),
            next_song_alias: "nextsong".into(),
            current_song_alias: "currentsong".into(),
            set_comment_alias: "setcomment".into(),
            num_cached_alias: "numcached".into(),
            cache_size_alias: "cachesize".into(),
            kill_alias: "kill".into(),
            shuffle_alias: "shuffle".into(),
            shuffle_on_alias: "shuffleon".into(),
            shuffle_off_alias: "shuffleoff".into(),
        }
    }
}

/// Which commands need an admin. Only enforced with `admins_enabled`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub admins_enabled: bool,
    /// Discord user names or user ids
    pub admins: Vec<String>,
    pub admin_add: bool,
    pub admin_add_playlists: bool,
    pub admin_skip: bool,
    pub admin_help: bool,
    pub admin_volume: bool,
    pub admin_move: bool,
    pub admin_reload: bool,
    pub admin_reset: bool,
    pub admin_num_songs: bool,
    pub admin_next_song: bool,
    pub admin_current_song: bool,
    pub admin_set_comment: bool,
    pub admin_num_cached: bool,
    pub admin_cache_size: bool,
    pub admin_kill: bool,
    pub admin_shuffle: bool,
    pub admin_shuffle_toggle: bool,
    /// Force skips stop the song at once instead of counting as one vote
    pub admin_skip_bypasses_ratio: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            admins_enabled: true,
            admins: Vec::new(),
            admin_add: false,
            admin_add_playlists: false,
            admin_skip: false,
            admin_help: false,
            admin_volume: false,
            admin_move: true,
            admin_reload: true,
            admin_reset: true,
            admin_num_songs: false,
            admin_next_song: false,
            admin_current_song: false,
            admin_set_comment: true,
            admin_num_cached: true,
            admin_cache_size: true,
            admin_kill: true,
            admin_shuffle: true,
            admin_shuffle_toggle: true,
            admin_skip_bypasses_ratio: true,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = std::env::var("DJ_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    /// Loads `path` (optional) plus the environment, without reading `.env`.
    pub fn load_from(path: &str) -> Result<Self> {
        let mut config: Config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("DJ")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("permissions.admins"),
            )
            .build()
            .with_context(|| format!("No se pudo leer la configuración de {path}"))?
            .try_deserialize()
            .context("Configuración inválida")?;

        config.apply_legacy_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_legacy_env(&mut self) {
        if self.discord.token.is_empty() {
            if let Ok(token) = std::env::var("DISCORD_TOKEN") {
                self.discord.token = token;
            }
        }
        if self.discord.guild_id == 0 {
            if let Some(id) = std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()) {
                self.discord.guild_id = id;
            }
        }
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - A Discord token and guild id must be present
    /// - Skip ratios must be in `(0.0, 1.0]`
    /// - Volumes must satisfy `0 <= lowest <= default <= highest <= 2`
    /// - The cache size must be greater than 0 when caching is enabled
    /// - The command prefix must be exactly one character
    pub fn validate(&self) -> Result<()> {
        if self.discord.token.trim().is_empty() {
            anyhow::bail!("Falta el token de Discord (DJ_DISCORD__TOKEN o DISCORD_TOKEN)");
        }
        if self.discord.guild_id == 0 {
            anyhow::bail!("Falta el id del servidor (DJ_DISCORD__GUILD_ID o GUILD_ID)");
        }

        for (name, ratio) in [
            ("skip_ratio", self.general.skip_ratio),
            ("playlist_skip_ratio", self.general.playlist_skip_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                anyhow::bail!("{name} debe estar entre 0 y 1, es {ratio}");
            }
        }

        let v = &self.volume;
        if !(0.0 <= v.lowest_volume
            && v.lowest_volume <= v.default_volume
            && v.default_volume <= v.highest_volume
            && v.highest_volume <= 2.0)
        {
            anyhow::bail!(
                "Volúmenes inválidos: mínimo {}, por defecto {}, máximo {}",
                v.lowest_volume,
                v.default_volume,
                v.highest_volume
            );
        }

        if self.cache.enabled && self.cache.maximum_size == 0 {
            anyhow::bail!("cache.maximum_size debe ser mayor que 0");
        }

        if self.general.command_prefix.chars().count() != 1 {
            anyhow::bail!(
                "El prefijo de comandos debe ser un solo carácter, es «{}»",
                self.general.command_prefix
            );
        }

        if self.general.fetch_timeout == 0 {
            anyhow::bail!("general.fetch_timeout debe ser mayor que 0");
        }

        Ok(())
    }

    /// Settings handed to the playback controller.
    pub fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            skip_ratio: self.general.skip_ratio,
            playlist_skip_ratio: self.general.playlist_skip_ratio,
            admin_skip_bypasses_ratio: self.permissions.admin_skip_bypasses_ratio,
            volume: VolumeSettings {
                default: self.volume.default_volume,
                lowest: self.volume.lowest_volume,
                highest: self.volume.highest_volume,
            },
            limits: QueueLimits {
                max_song_duration: Duration::from_secs(self.general.max_song_duration),
                max_song_per_playlist: self.general.max_song_per_playlist,
                automatic_shuffle: self.general.automatic_shuffle_on,
            },
            cache: self.cache_settings(),
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            enabled: self.cache.enabled,
            maximum_size: self.cache.maximum_size,
            expire_time: Duration::from_secs(self.cache.expire_time),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.general.fetch_timeout)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        let limit = |secs: u64| {
            if secs == 0 {
                "sin límite".to_string()
            } else {
                humantime::format_duration(Duration::from_secs(secs)).to_string()
            }
        };

        format!(
            "Config Summary:\n  \
            Discord: guild {} (canal: {})\n  \
            Comandos: prefijo «{}», admins {} ({})\n  \
            Skips: {:.0}% canción, {:.0}% playlist\n  \
            Límites: {} por canción, {} por playlist, shuffle automático={}\n  \
            Volumen: {:.2} ({:.2}-{:.2})\n  \
            Caché: {} en {} ({} bytes, expira en {})",
            self.discord.guild_id,
            self.discord.default_channel.as_deref().unwrap_or("ninguno"),
            self.general.command_prefix,
            if self.permissions.admins_enabled { "activados" } else { "desactivados" },
            self.permissions.admins.len(),
            self.general.skip_ratio * 100.0,
            self.general.playlist_skip_ratio * 100.0,
            limit(self.general.max_song_duration),
            self.general.max_song_per_playlist,
            self.general.automatic_shuffle_on,
            self.volume.default_volume,
            self.volume.lowest_volume,
            self.volume.highest_volume,
            if self.cache.enabled { "activado" } else { "desactivado" },
            self.cache.directory.display(),
            self.cache.maximum_size.to_formatted_string(&Locale::es),
            limit(self.cache.expire_time),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn valid() -> Config {
        let mut config = Config::default();
        config.discord.token = "token".into();
        config.discord.guild_id = 42;
        config
    }

    #[test]
    fn test_defaults_are_valid_once_discord_is_set() {
        assert!(valid().validate().is_ok());
        assert!(Config::default().validate().is_err());
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
            [discord]
            token = "abc"
            guild_id = 7

            [general]
            skip_ratio = 0.75
            max_song_per_playlist = 10

            [aliases]
            skip_alias = "saltar"

            [permissions]
            admins = ["ana", "123456"]
            "#
        )
        .unwrap();

        let config = Config::load_from(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.discord.guild_id, 7);
        assert_eq!(config.general.skip_ratio, 0.75);
        assert_eq!(config.general.max_song_per_playlist, 10);
        assert_eq!(config.general.command_prefix, "!");
        assert_eq!(config.aliases.skip_alias, "saltar");
        assert_eq!(config.aliases.add_alias, "add");
        assert_eq!(config.permissions.admins, vec!["ana".to_string(), "123456".to_string()]);
    }

    #[test]
    fn test_rejects_bad_ratios_and_volumes() {
        let mut config = valid();
        config.general.skip_ratio = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.volume.lowest_volume = 0.5;
        config.volume.default_volume = 0.2;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.general.command_prefix = "!!".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_playback_settings_conversion() {
        let mut config = valid();
        config.general.max_song_duration = 0;
        config.cache.enabled = true;
        config.cache.expire_time = 60;

        let settings = config.playback_settings();
        assert_eq!(settings.limits.max_song_duration, Duration::ZERO);
        assert_eq!(settings.limits.max_song_per_playlist, 50);
        assert!(settings.cache.enabled);
        assert_eq!(settings.cache.expire_time, Duration::from_secs(60));
        assert_eq!(settings.volume.highest, 0.8);
    }

    #[test]
    fn test_summary_hides_token() {
        let config = valid();
        let summary = config.summary();
        assert!(!summary.contains("token"));
        assert!(summary.contains("desactivado"));
        assert!(summary.contains("870"));
    }
}
