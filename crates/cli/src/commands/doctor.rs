//! `browserclaw doctor` — Diagnose system health.

use browserclaw_browser::locate_chrome;
use browserclaw_channels::{TelegramChannel, TelegramConfig};
use browserclaw_config::AppConfig;
use browserclaw_core::channel::Channel;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 BrowserClaw Doctor — System Diagnostics");
    println!("==========================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("  ⚠️  No config file, using defaults — run `browserclaw onboard`");
        issues += 1;
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  Fix the config before running further checks.");
            return Ok(());
        }
    };

    match locate_chrome(&config.browser) {
        Ok(path) => println!("  ✅ Chrome found: {}", path.display()),
        Err(e) => {
            println!("  ❌ Chrome not found: {e}");
            issues += 1;
        }
    }

    match browserclaw_providers::build_vision(&config.vision, &config.browser) {
        Ok(vision) => match vision.health_check().await {
            Ok(true) => println!("  ✅ Vision model reachable: {}", config.vision.model),
            Ok(false) => {
                println!("  ❌ Vision model rejected the request: {}", config.vision.model);
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Vision model unreachable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    match browserclaw_providers::build_image(&config.image) {
        Ok(_) => println!("  ✅ Image model configured: {}", config.image.model),
        Err(e) => println!("  ⚠️  Image generation disabled: {e}"),
    }

    match TelegramConfig::from_settings(&config.telegram) {
        Ok(telegram) => {
            if telegram.allowed_users.is_empty() {
                println!("  ⚠️  telegram.allowed_users is empty — the bot will ignore everyone");
                issues += 1;
            }
            match TelegramChannel::new(telegram).health_check().await {
                Ok(_) => println!("  ✅ Telegram bot token accepted"),
                Err(e) => {
                    println!("  ❌ Telegram: {e}");
                    issues += 1;
                }
            }
        }
        Err(e) => println!("  ⚠️  {e} (only needed for `browserclaw run`)"),
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
