use std::collections::HashSet;

use super::commands::CommandKind;
use crate::{
    config::PermissionConfig,
    error::{DjError, DjResult},
};

/// Who sent a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoker {
    pub id: u64,
    pub name: String,
}

/// Admin requirements per command, built once from `[permissions]`.
#[derive(Debug, Clone)]
pub struct PermissionTable {
    enabled: bool,
    admins: HashSet<String>,
    admin_only: HashSet<CommandKind>,
    admin_playlists: bool,
}

impl PermissionTable {
    pub fn from_config(config: &PermissionConfig) -> Self {
        let flags = [
            (CommandKind::Add, config.admin_add),
            (CommandKind::Skip, config.admin_skip),
            (CommandKind::SkipPlaylist, config.admin_skip),
            (CommandKind::ForceSkip, true),
            (CommandKind::ForceSkipPlaylist, true),
            (CommandKind::Help, config.admin_help),
            (CommandKind::Volume, config.admin_volume),
            (CommandKind::Move, config.admin_move),
            (CommandKind::Reload, config.admin_reload),
            (CommandKind::Reset, config.admin_reset),
            (CommandKind::NumSongs, config.admin_num_songs),
            (CommandKind::NextSong, config.admin_next_song),
            (CommandKind::CurrentSong, config.admin_current_song),
            (CommandKind::SetComment, config.admin_set_comment),
            (CommandKind::NumCached, config.admin_num_cached),
            (CommandKind::CacheSize, config.admin_cache_size),
            (CommandKind::Kill, config.admin_kill),
            (CommandKind::Shuffle, config.admin_shuffle),
            (CommandKind::ShuffleOn, config.admin_shuffle_toggle),
            (CommandKind::ShuffleOff, config.admin_shuffle_toggle),
        ];

        Self {
            enabled: config.admins_enabled,
            admins: config.admins.iter().map(|a| a.trim().to_lowercase()).collect(),
            admin_only: flags
                .into_iter()
                .filter(|(_, admin)| *admin)
                .map(|(kind, _)| kind)
                .collect(),
            admin_playlists: config.admin_add_playlists,
        }
    }

    /// Admins are listed by user name (case-insensitive) or user id.
    pub fn is_admin(&self, invoker: &Invoker) -> bool {
        !self.enabled
            || self.admins.contains(&invoker.name.to_lowercase())
            || self.admins.contains(&invoker.id.to_string())
    }

    pub fn requires_admin(&self, kind: CommandKind) -> bool {
        self.enabled && self.admin_only.contains(&kind)
    }

    pub fn authorize(&self, kind: CommandKind, invoker: &Invoker, alias: &str) -> DjResult<()> {
        if self.requires_admin(kind) && !self.is_admin(invoker) {
            return Err(DjError::Permission {
                user: invoker.name.clone(),
                command: alias.to_string(),
            });
        }
        Ok(())
    }

    /// Playlists have their own flag, checked once the URL turned out to be
    /// a playlist.
    pub fn authorize_playlist(&self, invoker: &Invoker, alias: &str) -> DjResult<()> {
        if self.enabled && self.admin_playlists && !self.is_admin(invoker) {
            return Err(DjError::Permission {
                user: invoker.name.clone(),
                command: format!("{alias} (playlist)"),
            });
        }
        Ok(())
    }
}
