//! CLI channel — interactive terminal-based chat.
//!
//! Reads instructions from stdin and prints replies to stdout. Terminals
//! cannot show pictures, so screenshots and generated images are written
//! to the captures directory and the path is printed instead.

use std::path::PathBuf;

use async_trait::async_trait;
use browserclaw_core::channel::{Channel, ChannelId, ChannelMessage};
use browserclaw_core::error::ChannelError;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

pub const CLI_CHAT_ID: &str = "local";

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel {
    id: ChannelId,
    captures_dir: PathBuf,
}

impl CliChannel {
    pub fn new(captures_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: ChannelId("cli".into()),
            captures_dir: captures_dir.into(),
        }
    }

    /// Write an image to the captures directory, returning its path.
    pub async fn save_capture(&self, photo: &[u8]) -> Result<PathBuf, ChannelError> {
        tokio::fs::create_dir_all(&self.captures_dir)
            .await
            .map_err(|e| self.delivery_failed(e))?;

        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S%.3f");
        let ext = if photo.starts_with(b"\x89PNG") { "png" } else { "jpg" };
        let path = self.captures_dir.join(format!("capture-{stamp}.{ext}"));
        tokio::fs::write(&path, photo)
            .await
            .map_err(|e| self.delivery_failed(e))?;
        debug!(path = %path.display(), bytes = photo.len(), "Saved capture");
        Ok(path)
    }

    fn delivery_failed(&self, e: std::io::Error) -> ChannelError {
        ChannelError::DeliveryFailed {
            channel: "cli".into(),
            reason: format!("{}: {e}", self.captures_dir.display()),
        }
    }
}

/// Build the message the CLI channel would produce for `line`.
pub fn local_message(line: &str) -> ChannelMessage {
    ChannelMessage {
        channel_id: ChannelId("cli".into()),
        sender_id: "local_user".into(),
        sender_name: Some("User".into()),
        content: line.to_string(),
        chat_id: CLI_CHAT_ID.into(),
        metadata: serde_json::Map::new(),
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }

                        // Check for exit commands
                        if matches!(line.as_str(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                            break;
                        }

                        if tx.send(Ok(local_message(&line))).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, _chat_id: &str, content: &str) -> Result<(), ChannelError> {
        println!("{content}");
        Ok(())
    }

    async fn send_photo(
        &self,
        _chat_id: &str,
        photo: &[u8],
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let path = self.save_capture(photo).await?;
        match caption {
            Some(caption) => println!("[image] {} ({caption})", path.display()),
            None => println!("[image] {}", path.display()),
        }
        Ok(())
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true // CLI is always allowed (local user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_channel_properties() {
        let ch = CliChannel::new("/tmp/captures");
        assert_eq!(ch.name(), "cli");
        assert_eq!(ch.id().0, "cli");
        assert!(ch.is_allowed("anyone"));
    }

    #[test]
    fn local_messages_share_one_session() {
        assert_eq!(local_message("a").session_key(), "cli:local");
        assert_eq!(local_message("b").session_key(), local_message("c").session_key());
    }

    #[tokio::test]
    async fn photos_are_saved_to_captures_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ch = CliChannel::new(dir.path().join("captures"));

        let jpeg = ch.save_capture(&[0xFF, 0xD8, 0xFF, 0xE0]).await.unwrap();
        assert!(jpeg.starts_with(dir.path().join("captures")));
        assert_eq!(jpeg.extension().unwrap(), "jpg");
        assert_eq!(std::fs::read(&jpeg).unwrap(), vec![0xFF, 0xD8, 0xFF, 0xE0]);

        let png = ch.save_capture(b"\x89PNG\r\n\x1a\n").await.unwrap();
        assert_eq!(png.extension().unwrap(), "png");

        ch.send_photo(CLI_CHAT_ID, b"jpeg", Some("example.com")).await.unwrap();
    }
}
