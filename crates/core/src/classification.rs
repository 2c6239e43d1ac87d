//! What an incoming chat message asks the agent loop to do.
//!
//! Parsing chat syntax into a [`Classification`] is the transport's job; the
//! agent loop defines what each classification means as an operation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    /// Open `url` in the conversation's browser.
    Browse { url: String },
    /// Act on the current page according to free-text `text`.
    Instruct { text: String },
    /// Produce an image from `prompt`; independent of browsing.
    GenerateImage { prompt: String },
}

impl Classification {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Browse { .. } => "browse",
            Self::Instruct { .. } => "instruct",
            Self::GenerateImage { .. } => "generate_image",
        }
    }

    /// Whether this operation lazily creates a session for a new identity.
    pub fn creates_session(&self) -> bool {
        !matches!(self, Self::GenerateImage { .. })
    }
}
