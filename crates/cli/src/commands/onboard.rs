//! `browserclaw onboard` — First-time setup.

use browserclaw_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let captures_dir = AppConfig::captures_dir();

    println!("BrowserClaw — First-Time Setup");
    println!("==============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if !captures_dir.exists() {
        std::fs::create_dir_all(&captures_dir)?;
        println!("✅ Created captures directory: {}", captures_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Created config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set GEMINI_API_KEY (or pick another provider in config.toml)");
    println!("   2. Set TELEGRAM_BOT_TOKEN and add your user id to telegram.allowed_users");
    println!("   3. Run: browserclaw doctor");
    println!("   4. Run: browserclaw run   (or `browserclaw chat` to try it locally)\n");

    Ok(())
}
