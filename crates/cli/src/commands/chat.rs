//! `browserclaw chat` — Interactive or scripted terminal chat.

use std::io::Write;
use std::sync::Arc;

use browserclaw_channels::CliChannel;
use browserclaw_channels::cli::local_message;
use browserclaw_config::AppConfig;
use browserclaw_core::channel::Channel;

use crate::runtime::{self, BotRuntime};

pub async fn run(messages: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    super::require_vision_key(&config)?;

    let (agent, event_bus) = runtime::build_agent(&config)?;
    let _events = runtime::spawn_event_logger(&event_bus);
    let channel = Arc::new(CliChannel::new(AppConfig::captures_dir()));
    let bot = BotRuntime::new(Arc::clone(&agent), channel.clone());

    if !messages.is_empty() {
        // Scripted mode: run each message in order, then close the browser.
        for text in &messages {
            println!("  You > {text}");
            bot.dispatch(local_message(text)).await;
        }
        agent.store().shutdown_all().await;
        return Ok(());
    }

    println!();
    println!("  BrowserClaw — Interactive Mode");
    println!();
    println!("  Vision:    {} ({})", config.vision.model, config.vision.provider);
    println!("  Headless:  {}", config.browser.headless);
    println!("  Captures:  {}", AppConfig::captures_dir().display());
    println!();
    println!("  Start with /browse <url>, then tell me what to do on the page.");
    println!("  Type /help for commands, 'exit' or Ctrl+D to quit.");
    println!();

    let mut rx = channel.start().await.map_err(|e| format!("Channel error: {e}"))?;

    print!("  You > ");
    std::io::stdout().flush()?;

    loop {
        tokio::select! {
            incoming = rx.recv() => match incoming {
                Some(Ok(msg)) => {
                    bot.dispatch(msg).await;
                    print!("  You > ");
                    std::io::stdout().flush()?;
                }
                Some(Err(e)) => {
                    eprintln!("  [Channel Error] {e}");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    agent.store().shutdown_all().await;
    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}
