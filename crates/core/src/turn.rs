//! The result of one agent loop invocation, handed back to the transport.

use serde::{Deserialize, Serialize};

/// Outcome class of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The operation completed.
    Ok,
    /// The human has to send something clearer (or wait for a busy session).
    NeedsMoreInput,
    /// A collaborator failed; the session remains usable.
    Failed,
    /// The operation does not apply to the session's current situation.
    Unsupported,
}

/// What the transport renders back to the human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResult {
    pub status: TurnStatus,

    /// Human-readable summary.
    pub message: String,

    /// Page state after the round. Absent for image generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,

    /// Generated image bytes. Present only for image generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
}

impl TurnResult {
    fn with_status(status: TurnStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            screenshot: None,
            image: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::with_status(TurnStatus::Ok, message)
    }

    pub fn needs_more_input(message: impl Into<String>) -> Self {
        Self::with_status(TurnStatus::NeedsMoreInput, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_status(TurnStatus::Failed, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::with_status(TurnStatus::Unsupported, message)
    }

    /// Attach a page screenshot.
    pub fn with_screenshot(mut self, screenshot: Vec<u8>) -> Self {
        self.screenshot = Some(screenshot);
        self
    }

    /// Attach a generated image.
    pub fn with_image(mut self, image: Vec<u8>) -> Self {
        self.image = Some(image);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == TurnStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_status_and_leave_payloads_empty() {
        let r = TurnResult::failed("boom");
        assert_eq!(r.status, TurnStatus::Failed);
        assert_eq!(r.message, "boom");
        assert!(r.screenshot.is_none() && r.image.is_none());
        assert!(!r.is_ok());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TurnStatus::NeedsMoreInput).unwrap();
        assert_eq!(json, r#""needs_more_input""#);
    }
}
