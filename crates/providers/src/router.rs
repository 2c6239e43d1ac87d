//! Provider router: builds the right model client from a config section.

use std::sync::Arc;

use browserclaw_config::{BrowserConfig, ModelConfig};
use browserclaw_core::decision::VisionDecider;
use browserclaw_core::error::Error;
use browserclaw_core::generation::ImageGenerator;
use browserclaw_core::intent::{IntentParseOptions, MAX_WAIT_MS};

use crate::gemini::{GEMINI_BASE_URL, GeminiImageGenerator, GeminiVision};
use crate::openai_compat::{OpenAiCompatVision, OpenAiImageGenerator};

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "gemini" => Some(GEMINI_BASE_URL),
        "openai" => Some("https://api.openai.com/v1"),
        "openrouter" => Some("https://openrouter.ai/api/v1"),
        "ollama" => Some("http://localhost:11434/v1"),
        _ => None,
    }
}

fn base_url(section: &str, config: &ModelConfig) -> Result<String, Error> {
    config
        .api_url
        .clone()
        .or_else(|| default_base_url(&config.provider).map(String::from))
        .ok_or_else(|| Error::Config {
            message: format!(
                "[{section}] provider '{}' has no known endpoint, set api_url",
                config.provider
            ),
        })
}

fn api_key(section: &str, config: &ModelConfig) -> Result<String, Error> {
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }
    // Local endpoints usually run without auth.
    if config.provider == "ollama" {
        return Ok(String::new());
    }
    let hint = config
        .provider_key_var()
        .map(|var| format!("{var} or BROWSERCLAW_API_KEY"))
        .unwrap_or_else(|| "BROWSERCLAW_API_KEY".into());
    Err(Error::Config {
        message: format!(
            "[{section}] no API key for provider '{}', set api_key or {hint}",
            config.provider
        ),
    })
}

/// Build the vision decider described by `[vision]`.
pub fn build_vision(
    config: &ModelConfig,
    browser: &BrowserConfig,
) -> Result<Arc<dyn VisionDecider>, Error> {
    let key = api_key("vision", config)?;
    let url = base_url("vision", config)?;
    let parse = IntentParseOptions {
        scroll_step: browser.scroll_step,
        max_wait_ms: MAX_WAIT_MS,
    };

    let decider: Arc<dyn VisionDecider> = match config.provider.as_str() {
        "gemini" => Arc::new(
            GeminiVision::new(key, &config.model)
                .with_base_url(url)
                .with_temperature(config.temperature)
                .with_viewport(browser.viewport_width, browser.viewport_height)
                .with_parse_options(parse),
        ),
        name => Arc::new(
            OpenAiCompatVision::new(name, url, key, &config.model)
                .with_temperature(config.temperature)
                .with_viewport(browser.viewport_width, browser.viewport_height)
                .with_parse_options(parse),
        ),
    };

    tracing::debug!(provider = %config.provider, model = %config.model, "Vision model ready");
    Ok(decider)
}

/// Build the image generator described by `[image]`.
pub fn build_image(config: &ModelConfig) -> Result<Arc<dyn ImageGenerator>, Error> {
    let key = api_key("image", config)?;
    let url = base_url("image", config)?;

    let generator: Arc<dyn ImageGenerator> = match config.provider.as_str() {
        "gemini" => Arc::new(GeminiImageGenerator::new(key, &config.model).with_base_url(url)),
        name => Arc::new(OpenAiImageGenerator::new(name, url, key, &config.model)),
    };

    tracing::debug!(provider = %config.provider, model = %config.model, "Image model ready");
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use browserclaw_config::AppConfig;

    fn with_key(mut model: ModelConfig) -> ModelConfig {
        model.api_key = Some("test-key".into());
        model
    }

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("gemini").unwrap().contains("generativelanguage"));
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("somewhere").is_none());
    }

    #[test]
    fn builds_default_gemini_clients() {
        let config = AppConfig::default();
        let vision = build_vision(&with_key(config.vision.clone()), &config.browser).unwrap();
        assert_eq!(vision.name(), "gemini");
        let image = build_image(&with_key(config.image.clone())).unwrap();
        assert_eq!(image.name(), "gemini");
    }

    #[test]
    fn openai_compatible_providers() {
        let config = AppConfig::default();
        let mut model = with_key(config.vision.clone());
        model.provider = "openrouter".into();
        model.model = "openai/gpt-4o".into();
        assert_eq!(build_vision(&model, &config.browser).unwrap().name(), "openrouter");
    }

    #[test]
    fn missing_key_names_the_variable() {
        let config = AppConfig::default();
        let mut model = config.vision.clone();
        model.api_key = None;
        let err = build_vision(&model, &config.browser).err().unwrap();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = AppConfig::default();
        let mut model = config.vision.clone();
        model.provider = "ollama".into();
        model.api_key = None;
        assert!(build_vision(&model, &config.browser).is_ok());
    }

    #[test]
    fn unknown_provider_needs_url() {
        let mut model = with_key(AppConfig::default().image);
        model.provider = "custom".into();
        let err = build_image(&model).err().unwrap();
        assert!(err.to_string().contains("set api_url"));

        model.api_url = Some("https://llm.internal/v1".into());
        assert_eq!(build_image(&model).unwrap().name(), "custom");
    }
}
