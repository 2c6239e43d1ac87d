//! Error types for the BrowserClaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator of the agent loop has its own error variant; all of them
//! are caught at the agent loop boundary and rendered into a turn result.

use thiserror::Error;

/// The top-level error type for all BrowserClaw operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Browser capability errors ---
    #[error("Browser error: {0}")]
    Capability(#[from] CapabilityError),

    // --- Vision model errors ---
    #[error("Decision error: {0}")]
    Decision(#[from] DecisionError),

    // --- Image model errors ---
    #[error("Image generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- Usage errors ---
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    // --- Channel errors ---
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the browser automation primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("{action} failed: {reason}")]
    Action { action: String, reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Browser context already released")]
    Closed,
}

/// Failures while asking the vision model for a decision.
///
/// These never reach the user as a distinct failure: the agent loop maps
/// them to an unrecognized intent.
#[derive(Debug, Clone, Error)]
pub enum DecisionError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Decision timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Failures of the image generation model.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Image generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Model returned no image")]
    EmptyResponse,

    #[error("Could not decode image payload: {0}")]
    Decode(String),

    #[error("Image generation not configured: {0}")]
    NotConfigured(String),
}

/// The request cannot be served in the session's current situation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("No page is open yet, nothing to act on")]
    NoActivePage,

    #[error("A previous request for this conversation is still running")]
    Busy,

    #[error("Session capacity reached ({limit} active browser sessions)")]
    CapacityReached { limit: usize },
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    #[error("Message delivery failed to {channel}: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Unauthorized sender: {sender_id} on {channel}")]
    Unauthorized { channel: String, sender_id: String },

    #[error("Channel connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_timeout_displays_operation() {
        let err = Error::Capability(CapabilityError::Timeout {
            operation: "click".into(),
            timeout_ms: 10_000,
        });
        assert!(err.to_string().contains("click"));
        assert!(err.to_string().contains("10000ms"));
    }

    #[test]
    fn navigation_error_displays_url_and_reason() {
        let err = CapabilityError::Navigation {
            url: "https://nope.invalid".into(),
            reason: "net::ERR_NAME_NOT_RESOLVED".into(),
        };
        assert!(err.to_string().contains("nope.invalid"));
        assert!(err.to_string().contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn usage_error_converts_into_top_level() {
        let err: Error = UsageError::CapacityReached { limit: 4 }.into();
        assert!(matches!(err, Error::Usage(UsageError::CapacityReached { limit: 4 })));
        assert!(err.to_string().contains('4'));
    }
}
