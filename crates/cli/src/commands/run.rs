//! `browserclaw run` — Serve the Telegram bot.

use std::sync::Arc;

use browserclaw_channels::{TelegramChannel, TelegramConfig};
use browserclaw_core::channel::Channel;
use tracing::{info, warn};

use crate::runtime::{self, BotRuntime};

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    super::require_vision_key(&config)?;

    let telegram = TelegramConfig::from_settings(&config.telegram)?;
    if telegram.allowed_users.is_empty() {
        warn!("telegram.allowed_users is empty, every message will be ignored");
    }
    let channel = Arc::new(TelegramChannel::new(telegram));
    match channel.health_check().await {
        Ok(_) => info!("Telegram bot token accepted"),
        Err(e) => return Err(format!("Telegram rejected the bot token: {e}").into()),
    }

    let (agent, event_bus) = runtime::build_agent(&config)?;
    let _events = runtime::spawn_event_logger(&event_bus);

    info!(
        vision = %config.vision.model,
        image = %config.image.model,
        max_sessions = config.agent.max_sessions,
        "BrowserClaw bot starting"
    );
    println!("BrowserClaw is running. Press Ctrl+C to stop.");

    let bot = Arc::new(BotRuntime::new(agent, channel));
    bot.run_until(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    println!("Goodbye!");
    Ok(())
}
