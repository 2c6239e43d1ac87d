//! Configuration loading, validation, and management for BrowserClaw.
//!
//! Loads configuration from `~/.browserclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.browserclaw/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session and round control
    #[serde(default)]
    pub agent: AgentConfig,

    /// Per-call timeout budgets
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Headless browser settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// The screenshot-reading decision model
    #[serde(default = "ModelConfig::default_vision")]
    pub vision: ModelConfig,

    /// The image generation model
    #[serde(default = "ModelConfig::default_image")]
    pub image: ModelConfig,

    /// Telegram transport
    #[serde(default)]
    pub telegram: TelegramSettings,
}

fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// What to do with an instruction that arrives while its session is mid-round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the running round to finish, then run.
    #[default]
    Queue,
    /// Answer immediately that the session is busy.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// How many (instruction, intent, outcome) triples a session keeps
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Upper bound on rounds in one multi-round task
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    #[serde(default)]
    pub on_busy: BusyPolicy,

    /// Maximum live sessions (each owns a browser). 0 = unbounded.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_history_limit() -> usize {
    10
}
fn default_max_rounds() -> u32 {
    10
}
fn default_max_sessions() -> usize {
    16
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_rounds: default_max_rounds(),
            on_busy: BusyPolicy::default(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Timeout budgets in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_navigation_ms")]
    pub navigation: u64,

    #[serde(default = "default_action_ms")]
    pub action: u64,

    #[serde(default = "default_decision_ms")]
    pub decision: u64,

    #[serde(default = "default_image_generation_ms")]
    pub image_generation: u64,

    #[serde(default = "default_screenshot_ms")]
    pub screenshot: u64,
}

fn default_navigation_ms() -> u64 {
    30_000
}
fn default_action_ms() -> u64 {
    10_000
}
fn default_decision_ms() -> u64 {
    60_000
}
fn default_image_generation_ms() -> u64 {
    120_000
}
fn default_screenshot_ms() -> u64 {
    10_000
}

impl TimeoutConfig {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation)
    }
    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action)
    }
    pub fn decision(&self) -> Duration {
        Duration::from_millis(self.decision)
    }
    pub fn image_generation(&self) -> Duration {
        Duration::from_millis(self.image_generation)
    }
    pub fn screenshot(&self) -> Duration {
        Duration::from_millis(self.screenshot)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            navigation: default_navigation_ms(),
            action: default_action_ms(),
            decision: default_decision_ms(),
            image_generation: default_image_generation_ms(),
            screenshot: default_screenshot_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Explicit Chrome/Chromium binary; autodetected when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<PathBuf>,

    /// JPEG quality of screenshots (0-100)
    #[serde(default = "default_screenshot_quality")]
    pub screenshot_quality: u32,

    /// Pixels scrolled for a plain "scroll up/down" decision
    #[serde(default = "default_scroll_step")]
    pub scroll_step: i32,

    /// Pause after clicks and key presses so the page can react
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_viewport_width() -> u32 {
    1280
}
fn default_viewport_height() -> u32 {
    720
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/122.0.0.0 Safari/537.36"
        .into()
}
fn default_screenshot_quality() -> u32 {
    80
}
fn default_scroll_step() -> i32 {
    500
}
fn default_settle_ms() -> u64 {
    1000
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            user_agent: default_user_agent(),
            chrome_path: None,
            screenshot_quality: default_screenshot_quality(),
            scroll_step: default_scroll_step(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// Settings for one model endpoint (vision or image).
#[derive(Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// "openai", "openrouter", "gemini", or "custom"
    pub provider: String,

    pub model: String,

    /// Override the provider's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sampling temperature (decision model only)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.4
}

impl ModelConfig {
    fn default_vision() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-3-flash-preview".into(),
            api_url: None,
            api_key: None,
            temperature: default_temperature(),
        }
    }

    fn default_image() -> Self {
        Self {
            provider: "gemini".into(),
            model: "nano-banana-pro-preview".into(),
            api_url: None,
            api_key: None,
            temperature: default_temperature(),
        }
    }

    /// Environment variable holding the key for this provider, if any.
    pub fn provider_key_var(&self) -> Option<&'static str> {
        match self.provider.as_str() {
            "openai" => Some("OPENAI_API_KEY"),
            "openrouter" => Some("OPENROUTER_API_KEY"),
            "gemini" => Some("GEMINI_API_KEY"),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Allowlist of user IDs or usernames. Empty = deny all. ["*"] = allow all.
    #[serde(default)]
    pub allowed_users: Vec<String>,

    /// Long-polling timeout for getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_poll_timeout() -> u64 {
    30
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            allowed_users: vec![],
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &redact(&self.bot_token))
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.browserclaw/config.toml).
    ///
    /// Also checks environment variables:
    /// - `BROWSERCLAW_API_KEY` (highest priority, both models)
    /// - `GEMINI_API_KEY` / `OPENAI_API_KEY` / `OPENROUTER_API_KEY` per provider
    /// - `TELEGRAM_BOT_TOKEN`
    /// - `BROWSERCLAW_VISION_MODEL`, `BROWSERCLAW_IMAGE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let generic = lookup("BROWSERCLAW_API_KEY");
        for model in [&mut self.vision, &mut self.image] {
            if model.api_key.is_none() {
                model.api_key = generic
                    .clone()
                    .or_else(|| model.provider_key_var().and_then(&lookup));
            }
        }

        if let Some(model) = lookup("BROWSERCLAW_VISION_MODEL") {
            self.vision.model = model;
        }
        if let Some(model) = lookup("BROWSERCLAW_IMAGE_MODEL") {
            self.image.model = model;
        }
        if self.telegram.bot_token.is_none() {
            self.telegram.bot_token = lookup("TELEGRAM_BOT_TOKEN");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("BROWSERCLAW_HOME") {
            return PathBuf::from(dir);
        }
        dirs_home().join(".browserclaw")
    }

    /// Where the CLI channel stores screenshots and images.
    pub fn captures_dir() -> PathBuf {
        Self::config_dir().join("captures")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.vision.temperature) {
            return Err(ConfigError::ValidationError(
                "vision.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.history_limit must be at least 1".into(),
            ));
        }

        if self.agent.max_rounds == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_rounds must be at least 1".into(),
            ));
        }

        let t = &self.timeouts;
        if [t.navigation, t.action, t.decision, t.image_generation, t.screenshot].contains(&0) {
            return Err(ConfigError::ValidationError(
                "timeouts must all be greater than 0ms".into(),
            ));
        }

        if self.browser.viewport_width == 0 || self.browser.viewport_height == 0 {
            return Err(ConfigError::ValidationError(
                "browser viewport dimensions must be non-zero".into(),
            ));
        }

        if self.browser.screenshot_quality > 100 {
            return Err(ConfigError::ValidationError(
                "browser.screenshot_quality must be between 0 and 100".into(),
            ));
        }

        Ok(())
    }

    /// Check if the vision model has an API key (from config or environment).
    pub fn has_vision_key(&self) -> bool {
        self.vision.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            timeouts: TimeoutConfig::default(),
            browser: BrowserConfig::default(),
            vision: ModelConfig::default_vision(),
            image: ModelConfig::default_image(),
            telegram: TelegramSettings::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
