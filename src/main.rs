use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;

use crate::bot::DjBot;
use crate::cache::AudioCache;
use crate::config::{Config, GeneralConfig};
use crate::sources::YtDlpClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_dj=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open DJ v{}", env!("CARGO_PKG_VERSION"));

    // El health check no necesita token ni configuración
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    let config = Config::load()?;
    info!("⚙️ Configuración:\n{}", config.summary());

    // Caché en disco y yt-dlp
    let cache = Arc::new(AudioCache::open(&config.cache.directory, config.cache_settings())?);
    info!("💾 {} canciones en caché de ejecuciones anteriores", cache.len());

    let ytdlp = Arc::new(YtDlpClient::detect(&config.general.ytdlp_path).await);
    ytdlp.verify_dependencies().await?;

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let kill = CancellationToken::new();
    let handler = DjBot::new(config.clone(), cache, ytdlp, kill.clone());
    let slot = handler.context_slot();

    let mut client = Client::builder(&config.discord.token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;
    let shard_manager = client.shard_manager.clone();

    info!("🚀 Conectando con Discord...");
    tokio::select! {
        result = client.start() => {
            if let Err(why) = result {
                error!("Error al ejecutar cliente: {:?}", why);
            }
        }
        _ = tokio::signal::ctrl_c() => info!("⚠️ Señal de shutdown recibida, cerrando..."),
        _ = kill.cancelled() => info!("💀 Cerrando por petición"),
    }

    if let Some(dj) = slot.get() {
        dj.controller.shutdown().await;
    }
    shard_manager.shutdown_all().await;

    info!("👋 Open DJ detenido");
    Ok(())
}

async fn health_check() -> Result<()> {
    let binary = std::env::var("DJ_GENERAL__YTDLP_PATH").unwrap_or_else(|_| GeneralConfig::default().ytdlp_path);
    YtDlpClient::new(binary).verify_dependencies().await?;
    println!("OK");
    Ok(())
}
