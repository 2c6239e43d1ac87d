//! Channel trait — the abstraction over chat platforms.
//!
//! A Channel connects BrowserClaw to a messaging platform (Telegram, CLI).
//! It receives messages from users and renders turn results back: text,
//! screenshots and generated images.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::ChannelError;

/// Unique identifier for a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// The channel this message belongs to
    pub channel_id: ChannelId,

    /// Sender identifier (platform-specific user ID)
    pub sender_id: String,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// The text content
    pub content: String,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// Platform-specific metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ChannelMessage {
    /// The conversation identity a session is keyed by.
    ///
    /// One session per chat on a channel, so two channels never share a
    /// browser even if their chat ids collide.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel_id, self.chat_id)
    }
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, message
/// formatting, and authentication.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram", "cli").
    fn name(&self) -> &str;

    /// Unique ID for this channel instance.
    fn id(&self) -> &ChannelId;

    /// Start listening for incoming messages.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<ChannelMessage, ChannelError>>,
        ChannelError,
    >;

    /// Send a text message to a specific chat.
    async fn send(&self, chat_id: &str, content: &str) -> std::result::Result<(), ChannelError>;

    /// Send an image (screenshot or generated picture) with an optional caption.
    async fn send_photo(
        &self,
        chat_id: &str,
        photo: &[u8],
        caption: Option<&str>,
    ) -> std::result::Result<(), ChannelError>;

    /// Send a typing indicator (if the platform supports it).
    async fn send_typing(&self, _chat_id: &str) -> std::result::Result<(), ChannelError> {
        Ok(()) // No-op default
    }

    /// Check if a sender is allowed (allowlist check).
    fn is_allowed(&self, sender_id: &str) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check — is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_combines_channel_and_chat() {
        let msg = ChannelMessage {
            channel_id: ChannelId("telegram".into()),
            sender_id: "12345".into(),
            sender_name: Some("Alice".into()),
            content: "/browse example.com".into(),
            chat_id: "67890".into(),
            metadata: serde_json::Map::new(),
        };
        assert_eq!(msg.session_key(), "telegram:67890");
    }
}
