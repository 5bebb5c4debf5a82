use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::sync::Arc;
use tracing::{error, info};

use guild_jukebox::{
    bot::MusicBot,
    config::Config,
    sources::YtDlpResolver,
    storage::{GuildSettings, JsonStorage},
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("{}", config.summary());

    let resolver = Arc::new(YtDlpResolver::new(&config));

    if std::env::args().any(|arg| arg == "--health-check") {
        let version = resolver.health_check().await?;
        println!("OK (yt-dlp {})", version);
        return Ok(());
    }

    let storage = Arc::new(tokio::sync::Mutex::new(
        JsonStorage::new(config.data_dir.clone(), GuildSettings::template(&config)).await?,
    ));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    // Streams run for the whole track, so this client carries no request timeout.
    let stream_client = reqwest::Client::new();
    let handler = MusicBot::new(config.clone(), storage, resolver, stream_client);

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("❌ Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
