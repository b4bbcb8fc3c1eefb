use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{
    commands::{Command, CommandParser},
    permissions::PermissionTable,
};
use crate::{audio::PlaybackController, config::Config, sources::TrackResolver};

/// Produces a fresh [`Config`] for the `reload` command.
pub type ConfigLoader = Box<dyn Fn() -> anyhow::Result<Config> + Send + Sync>;

/// Parts of the configuration the command layer reads on every message.
struct CommandSettings {
    parser: CommandParser,
    permissions: PermissionTable,
    default_comment: String,
}

impl CommandSettings {
    fn from_config(config: &Config) -> Self {
        Self {
            parser: CommandParser::from_config(config),
            permissions: PermissionTable::from_config(&config.permissions),
            default_comment: config.general.default_comment.clone(),
        }
    }
}

/// Everything a command handler needs, built once at startup and shared.
pub struct DjContext {
    pub controller: Arc<PlaybackController>,
    pub resolver: Arc<dyn TrackResolver>,
    settings: RwLock<CommandSettings>,
    loader: ConfigLoader,
    /// Text channel of the last command, where playback events are posted
    notify_channel: Mutex<Option<u64>>,
    kill: CancellationToken,
}

impl DjContext {
    pub fn new(
        config: &Config,
        controller: Arc<PlaybackController>,
        resolver: Arc<dyn TrackResolver>,
        loader: ConfigLoader,
        kill: CancellationToken,
    ) -> Self {
        Self {
            controller,
            resolver,
            settings: RwLock::new(CommandSettings::from_config(config)),
            loader,
            notify_channel: Mutex::new(None),
            kill,
        }
    }

    pub fn parse(&self, message: &str) -> Option<Command> {
        self.settings.read().parser.parse(message)
    }

    pub fn parser(&self) -> CommandParser {
        self.settings.read().parser.clone()
    }

    pub fn permissions(&self) -> PermissionTable {
        self.settings.read().permissions.clone()
    }

    pub fn default_comment(&self) -> String {
        self.settings.read().default_comment.clone()
    }

    /// Vuelve a leer la configuración y la aplica en caliente.
    ///
    /// The Discord token, guild and cache directory only change on restart.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let config = (self.loader)()?;
        *self.settings.write() = CommandSettings::from_config(&config);
        self.controller.apply_settings(config.playback_settings()).await;
        info!("🔄 Configuración recargada");
        Ok(())
    }

    pub fn set_notify_channel(&self, channel_id: u64) {
        *self.notify_channel.lock() = Some(channel_id);
    }

    pub fn notify_channel(&self) -> Option<u64> {
        *self.notify_channel.lock()
    }

    /// Pide el apagado del proceso.
    pub fn kill(&self) {
        info!("💀 Apagado solicitado");
        self.kill.cancel();
    }

    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }
}
