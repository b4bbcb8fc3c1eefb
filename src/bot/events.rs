use serenity::{gateway::ActivityData, model::id::ChannelId, prelude::Context};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::context::DjContext;
use crate::audio::PlaybackEvent;

/// Texto que se publica en el canal de notificaciones.
pub fn format_event(event: &PlaybackEvent) -> String {
    match event {
        PlaybackEvent::TrackStarted(track) => {
            let mut text = format!("▶️ Sonando: {track}");
            if let Some(playlist) = &track.playlist {
                text.push_str(&format!("\n📋 De la playlist «{}»", playlist.title));
            }
            text
        }
        PlaybackEvent::TrackFailed { track, reason } => {
            format!("⚠️ No se pudo reproducir «{}»: {}", track.title, reason)
        }
        PlaybackEvent::TrackSkipped {
            track,
            playlist: true,
            removed,
        } => {
            let title = track
                .playlist
                .as_ref()
                .map_or(track.title.as_str(), |p| p.title.as_str());
            format!("⏭️ Playlist «{title}» saltada ({removed} canciones quitadas de la cola)")
        }
        PlaybackEvent::TrackSkipped { track, .. } => {
            format!("⏭️ «{}» saltada", track.title)
        }
        PlaybackEvent::QueueFinished => "📭 La cola terminó".to_string(),
    }
}

/// Reenvía los eventos de reproducción a Discord hasta el apagado.
///
/// Messages go to the text channel of the last command; the bot's activity
/// shows the current song, or the default comment while idle.
pub fn spawn_event_forwarder(ctx: Context, dj: Arc<DjContext>) {
    let mut events = dj.controller.subscribe();
    let kill = dj.kill_token();

    tokio::spawn(async move {
        ctx.set_activity(Some(ActivityData::custom(dj.default_comment())));

        loop {
            let event = tokio::select! {
                _ = kill.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("⚠️ Se perdieron {} eventos de reproducción", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };

            match &event {
                PlaybackEvent::TrackStarted(track) => {
                    ctx.set_activity(Some(ActivityData::listening(track.title.clone())));
                }
                PlaybackEvent::QueueFinished => {
                    ctx.set_activity(Some(ActivityData::custom(dj.default_comment())));
                }
                _ => {}
            }

            let Some(channel) = dj.notify_channel() else {
                debug!("Sin canal de notificaciones para: {:?}", event);
                continue;
            };
            if let Err(e) = ChannelId::new(channel).say(&ctx.http, format_event(&event)).await {
                warn!("⚠️ No se pudo enviar la notificación: {}", e);
            }
        }

        info!("🛑 Reenvío de eventos detenido");
    });
}
