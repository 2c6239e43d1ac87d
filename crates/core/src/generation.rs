//! Image generation trait — text prompt in, image bytes out.

use async_trait::async_trait;
use crate::error::GenerationError;

/// A generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,

    /// MIME type reported by the model (e.g. "image/png")
    pub mime_type: String,
}

/// The core image generation trait.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// A human-readable name (e.g., "openai", "gemini").
    fn name(&self) -> &str;

    /// Generate one image for `prompt`.
    async fn generate(&self, prompt: &str) -> std::result::Result<GeneratedImage, GenerationError>;
}
