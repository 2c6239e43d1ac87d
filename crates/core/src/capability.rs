//! Browser capability traits — the abstraction over browser automation.
//!
//! A [`BrowserLauncher`] creates one isolated browsing context per session
//! (cookies and history scoped to that session). The context exposes the
//! primitive actions the agent loop drives through [`BrowserCapability`].
//!
//! Implementations: headless Chrome (`browserclaw-browser`), test doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::error::CapabilityError;

/// What the page looks like after a navigation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    /// The URL the browser ended up on (after redirects)
    pub url: String,

    /// The document title
    #[serde(default)]
    pub title: String,
}

/// One isolated browsing context with a single active page.
///
/// All methods are awaited to completion by the agent loop; the loop wraps
/// each call in its own timeout.
#[async_trait]
pub trait BrowserCapability: Send + Sync {
    /// Load `url` in the active page.
    async fn navigate(&self, url: &str) -> std::result::Result<PageState, CapabilityError>;

    /// Capture the visible viewport as image bytes.
    async fn screenshot(&self) -> std::result::Result<Vec<u8>, CapabilityError>;

    /// Click at viewport coordinates.
    async fn click(&self, x: u32, y: u32) -> std::result::Result<(), CapabilityError>;

    /// Type text into the focused element.
    async fn type_text(&self, text: &str) -> std::result::Result<(), CapabilityError>;

    /// Press a named key (e.g. "Enter", "ArrowDown").
    async fn press_key(&self, key: &str) -> std::result::Result<(), CapabilityError>;

    /// Scroll vertically by `dy` pixels; positive scrolls down.
    async fn scroll(&self, dy: i32) -> std::result::Result<(), CapabilityError>;

    /// Wait for the page to settle.
    ///
    /// Default implementation just sleeps.
    async fn wait(&self, ms: u64) -> std::result::Result<(), CapabilityError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    /// Release the context and everything it holds.
    ///
    /// Must be idempotent: closing an already-closed context is a no-op.
    async fn close(&self) -> std::result::Result<(), CapabilityError> {
        Ok(())
    }
}

/// Creates fresh, isolated browsing contexts.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// A human-readable name for this launcher (e.g., "chrome").
    fn name(&self) -> &str;

    /// Create a new context with one blank page.
    async fn launch(&self) -> std::result::Result<Box<dyn BrowserCapability>, CapabilityError>;
}
