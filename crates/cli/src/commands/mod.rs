pub mod chat;
pub mod doctor;
pub mod onboard;
pub mod run;

use browserclaw_config::AppConfig;

/// Load the config, mapping errors to something printable.
pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Stop early with setup instructions when the vision model has no key.
pub(crate) fn require_vision_key(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.has_vision_key() || config.vision.provider == "ollama" {
        return Ok(());
    }
    let var = config.vision.provider_key_var().unwrap_or("BROWSERCLAW_API_KEY");
    eprintln!();
    eprintln!("  ERROR: No API key for the vision model ({})!", config.vision.provider);
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    {var}");
    eprintln!("    BROWSERCLAW_API_KEY   (used for both models)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}
