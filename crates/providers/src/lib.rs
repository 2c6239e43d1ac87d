//! Model clients for BrowserClaw.
//!
//! Vision deciders implement `browserclaw_core::VisionDecider`, image
//! generators implement `browserclaw_core::ImageGenerator`. The router
//! builds the right client for a `[vision]` or `[image]` config section.

mod http;

pub mod gemini;
pub mod openai_compat;
pub mod prompt;
pub mod router;

pub use gemini::{GeminiImageGenerator, GeminiVision};
pub use openai_compat::{OpenAiCompatVision, OpenAiImageGenerator};
pub use router::{build_image, build_vision, default_base_url};
