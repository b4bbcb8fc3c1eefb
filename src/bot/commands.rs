//! Prefix command parsing.
//!
//! Chat messages starting with the configured prefix are split into an alias
//! and the rest of the line. Aliases come from the `[aliases]` section, so
//! `!saltar` can mean [`CommandKind::Skip`] on a Spanish-speaking server.

use regex::Regex;
use std::{collections::HashMap, sync::OnceLock};

use crate::config::{AliasConfig, Config};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Add,
    Skip,
    SkipPlaylist,
    ForceSkip,
    ForceSkipPlaylist,
    Help,
    Volume,
    Move,
    Reload,
    Reset,
    NumSongs,
    NextSong,
    CurrentSong,
    SetComment,
    NumCached,
    CacheSize,
    Kill,
    Shuffle,
    ShuffleOn,
    ShuffleOff,
}

impl CommandKind {
    pub const ALL: [CommandKind; 20] = [
        Self::Add,
        Self::Skip,
        Self::SkipPlaylist,
        Self::ForceSkip,
        Self::ForceSkipPlaylist,
        Self::Help,
        Self::Volume,
        Self::Move,
        Self::Reload,
        Self::Reset,
        Self::NumSongs,
        Self::NextSong,
        Self::CurrentSong,
        Self::SetComment,
        Self::NumCached,
        Self::CacheSize,
        Self::Kill,
        Self::Shuffle,
        Self::ShuffleOn,
        Self::ShuffleOff,
    ];

    /// Descripción para `!help`
    pub fn description(self) -> &'static str {
        match self {
            Self::Add => "Añade una canción o playlist: `<url>`",
            Self::Skip => "Vota para saltar la canción actual",
            Self::SkipPlaylist => "Vota para saltar la playlist actual",
            Self::ForceSkip => "Salta la canción actual (admin)",
            Self::ForceSkipPlaylist => "Salta la playlist actual (admin)",
            Self::Help => "Muestra esta ayuda",
            Self::Volume => "Muestra o cambia el volumen: `[valor]`",
            Self::Move => "Mueve el bot a otro canal de voz: `<canal>`",
            Self::Reload => "Recarga la configuración",
            Self::Reset => "Vacía la cola y detiene la reproducción",
            Self::NumSongs => "Número de canciones en la cola",
            Self::NextSong => "Muestra la siguiente canción",
            Self::CurrentSong => "Muestra la canción actual",
            Self::SetComment => "Añade un comentario a la canción actual: `<texto>`",
            Self::NumCached => "Número de canciones en caché",
            Self::CacheSize => "Tamaño del caché",
            Self::Kill => "Apaga el bot",
            Self::Shuffle => "Mezcla la cola",
            Self::ShuffleOn => "Activa la mezcla automática",
            Self::ShuffleOff => "Desactiva la mezcla automática",
        }
    }

    fn alias<'a>(self, aliases: &'a AliasConfig) -> &'a str {
        match self {
            Self::Add => &aliases.add_alias,
            Self::Skip => &aliases.skip_alias,
            Self::SkipPlaylist => &aliases.skip_playlist_alias,
            Self::ForceSkip => &aliases.admin_skip_alias,
            Self::ForceSkipPlaylist => &aliases.admin_skip_playlist_alias,
            Self::Help => &aliases.help_alias,
            Self::Volume => &aliases.volume_alias,
            Self::Move => &aliases.move_alias,
            Self::Reload => &aliases.reload_alias,
            Self::Reset => &aliases.reset_alias,
            Self::NumSongs => &aliases.num_songs_alias,
            Self::NextSong => &aliases.next_song_alias,
            Self::CurrentSong => &aliases.current_song_alias,
            Self::SetComment => &aliases.set_comment_alias,
            Self::NumCached => &aliases.num_cached_alias,
            Self::CacheSize => &aliases.cache_size_alias,
            Self::Kill => &aliases.kill_alias,
            Self::Shuffle => &aliases.shuffle_alias,
            Self::ShuffleOn => &aliases.shuffle_on_alias,
            Self::ShuffleOff => &aliases.shuffle_off_alias,
        }
    }
}

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    /// Rest of the line, trimmed; `None` when empty
    pub argument: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandParser {
    prefix: char,
    by_alias: HashMap<String, CommandKind>,
    by_kind: HashMap<CommandKind, String>,
}

impl CommandParser {
    pub fn new(prefix: char, aliases: &AliasConfig) -> Self {
        let mut by_alias = HashMap::new();
        let mut by_kind = HashMap::new();
        for kind in CommandKind::ALL {
            let alias = kind.alias(aliases).trim().to_lowercase();
            by_kind.insert(kind, alias.clone());
            by_alias.insert(alias, kind);
        }
        Self {
            prefix,
            by_alias,
            by_kind,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let prefix = config.general.command_prefix.chars().next().unwrap_or('!');
        Self::new(prefix, &config.aliases)
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }

    /// Parses `message`. Returns `None` when it is not addressed to the bot:
    /// no prefix, or an alias nobody configured.
    pub fn parse(&self, message: &str) -> Option<Command> {
        let body = message.trim().strip_prefix(self.prefix)?;
        let (alias, rest) = match body.split_once(char::is_whitespace) {
            Some((alias, rest)) => (alias, rest.trim()),
            None => (body, ""),
        };

        let kind = *self.by_alias.get(&alias.to_lowercase())?;
        Some(Command {
            kind,
            argument: (!rest.is_empty()).then(|| rest.to_string()),
        })
    }

    pub fn alias_of(&self, kind: CommandKind) -> &str {
        self.by_kind.get(&kind).map_or("", String::as_str)
    }

    /// Lista de comandos para `!help`.
    pub fn help_text(&self) -> String {
        let mut help = String::from("**Comandos disponibles**\n");
        for kind in CommandKind::ALL {
            help.push_str(&format!(
                "`{}{}` - {}\n",
                self.prefix,
                self.alias_of(kind),
                kind.description()
            ));
        }
        help
    }
}

/// Extracts the first http(s) URL of `text`, with Discord's `<...>` embed
/// suppression removed.
pub fn extract_url(text: &str) -> Option<String> {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    let re = URL
        .get_or_init(|| Regex::new(r"<?(https?://[^\s<>]+)>?").ok())
        .as_ref()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
