use num_format::{Locale, ToFormattedString};
use tracing::{info, warn};

use super::{
    commands::{extract_url, Command, CommandKind},
    context::DjContext,
    permissions::{Invoker, PermissionTable},
};
use crate::{
    error::{DjError, DjResult},
    sources::Resolved,
};

const MIB: u64 = 1024 * 1024;

/// Maneja un mensaje de chat.
///
/// Returns the reply to post, or `None` when the message is not a command.
/// Errors become replies too; nothing here fails the caller.
pub async fn handle_message(dj: &DjContext, invoker: &Invoker, message: &str) -> Option<String> {
    let command = dj.parse(message)?;
    info!("📝 Comando {:?} usado por {}", command.kind, invoker.name);

    let reply = match execute(dj, invoker, command).await {
        Ok(reply) => reply,
        Err(e) => {
            if e.is_validation() || matches!(e, DjError::Permission { .. } | DjError::NothingPlaying) {
                info!("🚫 {}", e);
            } else {
                warn!("❌ Error en comando de {}: {}", invoker.name, e);
            }
            format!("❌ {e}")
        }
    };
    Some(reply)
}

/// Runs an already parsed command after checking permissions.
pub async fn execute(dj: &DjContext, invoker: &Invoker, command: Command) -> DjResult<String> {
    let parser = dj.parser();
    let permissions = dj.permissions();
    let alias = parser.alias_of(command.kind).to_string();
    permissions.authorize(command.kind, invoker, &alias)?;

    let usage = || DjError::InvalidArgument(format!("uso: {}{} <argumento>", parser.prefix(), alias));
    let controller = &dj.controller;

    match command.kind {
        CommandKind::Add => {
            let url = command
                .argument
                .as_deref()
                .and_then(extract_url)
                .ok_or_else(|| DjError::InvalidArgument(format!("uso: {}{} <url>", parser.prefix(), alias)))?;
            add(dj, &permissions, invoker, &url, &alias).await
        }
        CommandKind::Skip => skip(dj, invoker, false, false).await,
        CommandKind::SkipPlaylist => skip(dj, invoker, true, false).await,
        CommandKind::ForceSkip => skip(dj, invoker, false, true).await,
        CommandKind::ForceSkipPlaylist => skip(dj, invoker, true, true).await,
        CommandKind::Help => Ok(parser.help_text()),
        CommandKind::Volume => match command.argument {
            None => Ok(format!("🔊 Volumen actual: {:.2}", controller.volume())),
            Some(raw) => volume(dj, &raw).await,
        },
        CommandKind::Move => {
            let name = command.argument.ok_or_else(usage)?;
            controller.move_to_channel(&name).await?;
            Ok(format!("🚚 Moviéndome a «{name}»"))
        }
        CommandKind::Reload => match dj.reload().await {
            Ok(()) => Ok("🔄 Configuración recargada".to_string()),
            Err(e) => {
                warn!("⚠️ Recarga fallida: {:#}", e);
                Err(DjError::InvalidArgument(format!("configuración no recargada: {e:#}")))
            }
        },
        CommandKind::Reset => {
            let cleared = controller.reset().await;
            Ok(format!("🧹 Cola vaciada ({cleared} canciones) y reproducción detenida"))
        }
        CommandKind::NumSongs => Ok(format!("📊 Canciones en la cola: {}", controller.queue_len())),
        CommandKind::NextSong => Ok(match controller.next_track() {
            Some(track) => format!("⏭️ Siguiente: {track}"),
            None => "📭 No hay más canciones en la cola".to_string(),
        }),
        CommandKind::CurrentSong => {
            let track = controller.current_track().ok_or(DjError::NothingPlaying)?;
            let mut reply = format!("🎵 Sonando: {track}");
            if let Some(comment) = &track.comment {
                reply.push_str(&format!("\n💬 {comment}"));
            }
            Ok(reply)
        }
        CommandKind::SetComment => {
            let comment = command.argument.ok_or_else(usage)?;
            let track = controller.set_comment(comment)?;
            Ok(format!("💬 Comentario añadido a «{}»", track.title))
        }
        CommandKind::NumCached => Ok(format!("💾 Canciones en caché: {}", controller.cache().len())),
        CommandKind::CacheSize => {
            let cache = controller.cache();
            Ok(format!(
                "💾 El caché ocupa {} MiB de {} MiB",
                (cache.total_size() / MIB).to_formatted_string(&Locale::es),
                (cache.settings().maximum_size / MIB).to_formatted_string(&Locale::es),
            ))
        }
        CommandKind::Kill => {
            dj.kill();
            Ok("👋 Apagando...".to_string())
        }
        CommandKind::Shuffle => {
            controller.shuffle();
            Ok(format!("🔀 Cola mezclada ({} canciones)", controller.queue_len()))
        }
        CommandKind::ShuffleOn => {
            controller.set_automatic_shuffle(true);
            Ok("🔀 Mezcla automática activada".to_string())
        }
        CommandKind::ShuffleOff => {
            controller.set_automatic_shuffle(false);
            Ok("➡️ Mezcla automática desactivada".to_string())
        }
    }
}

async fn add(
    dj: &DjContext,
    permissions: &PermissionTable,
    invoker: &Invoker,
    url: &str,
    alias: &str,
) -> DjResult<String> {
    match dj.resolver.resolve(url, &invoker.name).await? {
        Resolved::Track(track) => {
            let title = track.title.clone();
            dj.controller.enqueue(track)?;
            Ok(format!(
                "🎵 «{}» añadida a la cola (posición {})",
                title,
                dj.controller.queue_len()
            ))
        }
        Resolved::Playlist { playlist, tracks } => {
            permissions.authorize_playlist(invoker, alias)?;
            let title = playlist.title.clone();
            let added = dj.controller.enqueue_playlist(playlist, tracks);

            if added.added == 0 && added.dropped > 0 {
                return Err(DjError::PlaylistFull {
                    limit: dj.controller.settings().limits.max_song_per_playlist,
                });
            }

            let mut reply = format!("📋 {} canciones de «{}» añadidas a la cola", added.added, title);
            if added.dropped > 0 {
                reply.push_str(&format!("\n✂️ {} descartadas por el límite por playlist", added.dropped));
            }
            if added.too_long > 0 {
                reply.push_str(&format!("\n⏱️ {} descartadas por ser demasiado largas", added.too_long));
            }
            Ok(reply)
        }
    }
}

async fn skip(dj: &DjContext, invoker: &Invoker, playlist: bool, force: bool) -> DjResult<String> {
    let controller = &dj.controller;
    let track = controller.current_track().ok_or(DjError::NothingPlaying)?;
    let label = match (&track.playlist, playlist) {
        (Some(list), true) => format!("la playlist «{}»", list.title),
        _ => format!("«{}»", track.title),
    };

    let tally = if playlist {
        controller.skip_playlist(&invoker.name, force).await?
    } else {
        controller.skip(&invoker.name, force).await?
    };

    Ok(if tally.should_skip {
        format!("⏭️ Saltando {label}")
    } else {
        format!(
            "🗳️ {} votó para saltar {} ({}/{})",
            invoker.name, label, tally.votes, tally.required
        )
    })
}

async fn volume(dj: &DjContext, raw: &str) -> DjResult<String> {
    let requested: f32 = raw
        .trim()
        .replace(',', ".")
        .parse()
        .map_err(|_| DjError::InvalidArgument(format!("«{raw}» no es un volumen válido")))?;
    if !requested.is_finite() {
        return Err(DjError::InvalidArgument(format!("«{raw}» no es un volumen válido")));
    }

    let applied = dj.controller.set_volume(requested).await;
    if (applied - requested).abs() > f32::EPSILON {
        let bounds = dj.controller.settings().volume;
        Ok(format!(
            "🔊 Volumen ajustado a {:.2} (permitido: {:.2}-{:.2})",
            applied, bounds.lowest, bounds.highest
        ))
    } else {
        Ok(format!("🔊 Volumen: {applied:.2}"))
    }
}
