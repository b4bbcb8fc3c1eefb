//! Songbird/serenity adapters for [`AudioEngine`] and [`VoiceChannel`].

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::{
    cache::Cache,
    model::{
        channel::ChannelType,
        id::{ChannelId, GuildId},
    },
};
use songbird::{
    input::{File, Input},
    tracks::TrackHandle,
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{path::Path, sync::Arc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{
    audio::engine::{AudioEngine, Completion, VoiceChannel},
    error::{DjError, DjResult},
};

/// Plays cached files through the guild's songbird call.
pub struct SongbirdEngine {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdEngine {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId) -> Self {
        Self {
            manager,
            guild_id,
            current: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AudioEngine for SongbirdEngine {
    async fn start_playback(&self, path: &Path, volume: f32) -> DjResult<Completion> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or_else(|| DjError::Engine("el bot no está en un canal de voz".into()))?;

        let input: Input = File::new(path.to_path_buf()).into();
        let handle = call.lock().await.play_only_input(input);

        if let Err(e) = handle.set_volume(volume) {
            warn!("⚠️ No se pudo ajustar el volumen: {}", e);
        }

        // End y Error comparten el mismo sender; solo el primero lo consume
        let (done, completion) = oneshot::channel();
        let notifier = CompletionNotifier {
            done: Arc::new(Mutex::new(Some(done))),
        };
        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(Event::Track(event), notifier.clone())
                .map_err(|e| DjError::Engine(e.to_string()))?;
        }

        debug!("▶️ Reproduciendo {}", path.display());
        *self.current.lock() = Some(handle);
        Ok(completion)
    }

    async fn stop(&self) {
        if let Some(handle) = self.current.lock().take() {
            if let Err(e) = handle.stop() {
                debug!("Track ya detenido: {}", e);
            }
        }
    }

    async fn set_volume(&self, volume: f32) {
        if let Some(handle) = self.current.lock().as_ref() {
            if let Err(e) = handle.set_volume(volume) {
                warn!("⚠️ No se pudo ajustar el volumen: {}", e);
            }
        }
    }
}

#[derive(Clone)]
struct CompletionNotifier {
    done: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[async_trait]
impl VoiceEventHandler for CompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in tracks.iter() {
                if let songbird::tracks::PlayMode::Errored(e) = &state.playing {
                    warn!("❌ Error de reproducción: {:?}", e);
                }
            }
        }
        if let Some(done) = self.done.lock().take() {
            let _ = done.send(());
        }
        Some(Event::Cancel)
    }
}

/// Voice channel membership read from serenity's cache.
pub struct DiscordChannel {
    cache: Arc<Cache>,
    manager: Arc<Songbird>,
    guild_id: GuildId,
}

impl DiscordChannel {
    pub fn new(cache: Arc<Cache>, manager: Arc<Songbird>, guild_id: GuildId) -> Self {
        Self {
            cache,
            manager,
            guild_id,
        }
    }

    async fn current_channel(&self) -> Option<ChannelId> {
        let call = self.manager.get(self.guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::new(channel.0.get()))
    }

    fn find_voice_channel(&self, name: &str) -> Option<ChannelId> {
        let guild = self.cache.guild(self.guild_id)?;
        guild
            .channels
            .values()
            .find(|c| c.kind == ChannelType::Voice && c.name.eq_ignore_ascii_case(name.trim()))
            .map(|c| c.id)
    }
}

#[async_trait]
impl VoiceChannel for DiscordChannel {
    async fn listener_count(&self) -> usize {
        let Some(channel_id) = self.current_channel().await else {
            return 0;
        };
        let bot_id = self.cache.current_user().id;

        match self.cache.guild(self.guild_id) {
            Some(guild) => guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(channel_id))
                .filter(|state| state.user_id != bot_id)
                .filter(|state| !state.member.as_ref().is_some_and(|m| m.user.bot))
                .count(),
            None => 0,
        }
    }

    async fn move_to_channel(&self, name: &str) -> DjResult<()> {
        let channel_id = self
            .find_voice_channel(name)
            .ok_or_else(|| DjError::Channel(format!("no existe el canal de voz «{name}»")))?;

        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map_err(|e| DjError::Channel(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {}", channel_id);
        Ok(())
    }
}
