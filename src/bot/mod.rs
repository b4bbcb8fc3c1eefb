//! # Bot Module
//!
//! Discord front end of Open DJ.
//!
//! This module wires the playback core to a single Discord guild:
//! - Prefix commands typed in any text channel of the guild
//! - Voice playback through Songbird
//! - Playback notifications and the bot's activity status
//! - Background maintenance tasks
//!
//! ## Architecture
//!
//! The bot is built around the [`DjBot`] struct which implements Serenity's
//! [`EventHandler`] trait. Serenity's cache and HTTP client only exist once
//! the client runs, so the [`DjContext`] is built in `ready` and stored in a
//! shared slot that `main` reads on shutdown.
//!
//! - [`commands`]: prefix and alias parsing
//! - [`permissions`]: admin checks per command
//! - [`handlers`]: one reply per command
//! - [`context`]: shared state, hot reload
//! - [`voice`]: Songbird adapters for the playback core
//! - [`events`]: playback events posted back to Discord
//!
//! ## Example
//!
//! ```rust,no_run
//! use open_dj::bot::DjBot;
//! use open_dj::cache::AudioCache;
//! use open_dj::config::Config;
//! use open_dj::sources::YtDlpClient;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let cache = Arc::new(AudioCache::open(&config.cache.directory, config.cache_settings())?);
//! let ytdlp = Arc::new(YtDlpClient::detect(&config.general.ytdlp_path).await);
//! let bot = DjBot::new(config, cache, ytdlp, CancellationToken::new());
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Result};
use serenity::{
    all::{Context, EventHandler, GuildId, Message, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod commands;
pub mod context;
pub mod events;
pub mod handlers;
pub mod permissions;
pub mod voice;

use self::{
    context::DjContext,
    permissions::Invoker,
    voice::{DiscordChannel, SongbirdEngine},
};
use crate::{
    audio::PlaybackController,
    cache::AudioCache,
    config::Config,
    sources::{Downloader, YtDlpClient},
};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Slot filled once the bot is connected.
pub type ContextSlot = Arc<OnceLock<Arc<DjContext>>>;

/// Serenity event handler for Open DJ.
///
/// ## Fields
///
/// - `config`: configuration read at startup
/// - `cache`: on-disk song cache, opened before the client starts
/// - `ytdlp`: resolver and downloader backed by yt-dlp
/// - `kill`: cancelled by `!kill`, a voice disconnect or Ctrl+C
/// - `dj`: shared state, available after `ready`
pub struct DjBot {
    config: Arc<Config>,
    cache: Arc<AudioCache>,
    ytdlp: Arc<YtDlpClient>,
    kill: CancellationToken,
    dj: ContextSlot,
}

impl DjBot {
    pub fn new(config: Config, cache: Arc<AudioCache>, ytdlp: Arc<YtDlpClient>, kill: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            cache,
            ytdlp,
            kill,
            dj: Arc::new(OnceLock::new()),
        }
    }

    pub fn context_slot(&self) -> ContextSlot {
        self.dj.clone()
    }

    fn guild_id(&self) -> GuildId {
        GuildId::new(self.config.discord.guild_id)
    }

    /// Construye el controlador y el contexto compartido.
    async fn setup(&self, ctx: &Context) -> Result<Arc<DjContext>> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow!("Songbird no inicializado"))?;
        let guild_id = self.guild_id();

        let engine = Arc::new(SongbirdEngine::new(manager.clone(), guild_id));
        let channel = Arc::new(DiscordChannel::new(ctx.cache.clone(), manager, guild_id));
        let downloader = Arc::new(Downloader::new(
            self.ytdlp.clone(),
            Duration::from_secs(self.config.general.max_song_duration),
            self.config.fetch_timeout(),
        ));

        let controller = PlaybackController::new(
            self.config.playback_settings(),
            self.cache.clone(),
            downloader,
            engine,
            channel,
        );

        Ok(Arc::new(DjContext::new(
            &self.config,
            controller,
            self.ytdlp.clone(),
            Box::new(Config::load),
            self.kill.clone(),
        )))
    }
}

#[async_trait]
impl EventHandler for DjBot {
    /// Builds the playback core on the first `ready`. Later `ready` events
    /// come from gateway reconnects and keep the existing state.
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);

        if self.dj.get().is_some() {
            info!("🔁 Reconexión al gateway, se conserva el estado");
            return;
        }

        let dj = match self.setup(&ctx).await {
            Ok(dj) => dj,
            Err(e) => {
                error!("❌ No se pudo inicializar el reproductor: {:?}", e);
                self.kill.cancel();
                return;
            }
        };
        if self.dj.set(dj.clone()).is_err() {
            return;
        }

        dj.controller.start();
        events::spawn_event_forwarder(ctx, dj);

        tokio::spawn(maintenance_tasks(
            self.cache.clone(),
            self.ytdlp.clone(),
            self.kill.clone(),
        ));
        info!("🚀 Reproductor listo");
    }

    /// Joins `default_channel` once the guild's channels are in the cache.
    async fn cache_ready(&self, _ctx: Context, _guilds: Vec<GuildId>) {
        let (Some(dj), Some(name)) = (self.dj.get(), self.config.discord.default_channel.as_deref()) else {
            return;
        };
        if let Err(e) = dj.controller.move_to_channel(name).await {
            warn!("⚠️ No se pudo entrar al canal por defecto «{}»: {}", name, e);
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot || msg.guild_id != Some(self.guild_id()) {
            return;
        }
        let Some(dj) = self.dj.get() else {
            return;
        };

        let invoker = Invoker {
            id: msg.author.id.get(),
            name: msg.author.name.clone(),
        };
        let Some(reply) = handlers::handle_message(dj, &invoker, &msg.content).await else {
            return;
        };

        dj.set_notify_channel(msg.channel_id.get());
        if let Err(e) = msg.channel_id.say(&ctx.http, reply).await {
            warn!("⚠️ No se pudo responder en {}: {}", msg.channel_id, e);
        }
    }

    /// A bot removed from its voice channel shuts down.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.guild_id != Some(self.guild_id()) {
            return;
        }

        if old.is_some_and(|old| old.channel_id.is_some()) && new.channel_id.is_none() {
            error!("🔌 Bot desconectado del canal de voz, apagando");
            self.kill.cancel();
        }
    }
}

/// Tareas periódicas: limpieza del caché y verificación de yt-dlp.
async fn maintenance_tasks(cache: Arc<AudioCache>, ytdlp: Arc<YtDlpClient>, kill: CancellationToken) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = kill.cancelled() => break,
            _ = interval.tick() => {}
        }

        let removed = cache.sweep();
        if let Err(e) = ytdlp.verify_dependencies().await {
            warn!("Error verificando dependencias: {:?}", e);
        }

        info!("🧹 Tareas de mantenimiento completadas ({} archivos expirados)", removed);
    }
}
