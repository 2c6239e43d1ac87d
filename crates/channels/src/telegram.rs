//! Telegram channel adapter.
//!
//! Talks to the Bot API directly: `getUpdates` long polling for incoming
//! messages, `sendMessage` / `sendPhoto` / `sendChatAction` for replies.

use std::time::Duration;

use async_trait::async_trait;
use browserclaw_config::TelegramSettings;
use browserclaw_core::channel::{Channel, ChannelId, ChannelMessage};
use browserclaw_core::error::ChannelError;
use serde::Deserialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Bot API limits, in characters.
const MAX_MESSAGE_CHARS: usize = 4096;
const MAX_CAPTION_CHARS: usize = 1024;

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Allowed user IDs or usernames. Empty = deny all, ["*"] = allow all.
    pub allowed_users: Vec<String>,
    /// Long-polling timeout passed to getUpdates.
    pub poll_timeout_secs: u64,
    pub api_base: String,
}

impl TelegramConfig {
    pub fn from_settings(settings: &TelegramSettings) -> Result<Self, ChannelError> {
        let bot_token = settings
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                ChannelError::NotConfigured(
                    "telegram.bot_token is not set (or TELEGRAM_BOT_TOKEN)".into(),
                )
            })?;
        Ok(Self {
            bot_token,
            allowed_users: settings.allowed_users.clone(),
            poll_timeout_secs: settings.poll_timeout_secs,
            api_base: TELEGRAM_API_BASE.into(),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("api_base", &self.api_base)
            .finish()
    }
}

type Inbox = mpsc::Sender<Result<ChannelMessage, ChannelError>>;

/// Telegram channel adapter.
pub struct TelegramChannel {
    config: TelegramConfig,
    channel_id: ChannelId,
    client: reqwest::Client,
    /// Sender for injecting test messages.
    inject_tx: Mutex<Option<Inbox>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        // getUpdates holds the connection for the poll timeout, so the
        // client ceiling has to sit above it.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            channel_id: ChannelId("telegram".into()),
            client,
            inject_tx: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    /// Inject a message as if it came from Telegram (for testing).
    pub async fn inject_message(&self, msg: ChannelMessage) -> Result<(), ChannelError> {
        let guard = self.inject_tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            tx.send(Ok(msg))
                .await
                .map_err(|_| ChannelError::ConnectionLost("Message channel closed".into()))
        } else {
            Err(ChannelError::ConnectionLost("Channel not started".into()))
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ChannelError> {
        let response = request.send().await.map_err(|e| self.delivery_failed(method, e))?;
        let body: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("{method}: {e}")))?;
        body.into_result(method)
    }

    fn delivery_failed(&self, method: &str, e: impl std::fmt::Display) -> ChannelError {
        ChannelError::DeliveryFailed {
            channel: "telegram".into(),
            reason: format!("{method}: {e}"),
        }
    }

    async fn send_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let request = self
            .client
            .post(self.config.api_url("sendMessage"))
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }));
        self.call::<serde_json::Value>("sendMessage", request).await?;
        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        info!("Telegram channel starting (long polling)");
        let (tx, rx) = mpsc::channel(64);
        *self.inject_tx.lock().await = Some(tx.clone());

        let handle = tokio::spawn(poll_updates(
            self.client.clone(),
            self.config.clone(),
            self.channel_id.clone(),
            tx,
        ));
        if let Some(previous) = self.poller.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn send(&self, chat_id: &str, content: &str) -> Result<(), ChannelError> {
        debug!(chat_id = %chat_id, content_len = content.len(), "Telegram send");
        for chunk in split_message(content, MAX_MESSAGE_CHARS) {
            self.send_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: &str,
        photo: &[u8],
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let (mime, file_name) = sniff_image(photo);
        debug!(chat_id = %chat_id, bytes = photo.len(), mime, "Telegram sendPhoto");

        let part = reqwest::multipart::Part::bytes(photo.to_vec())
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        if let Some(caption) = caption.filter(|c| !c.is_empty()) {
            form = form.text("caption", truncate_chars(caption, MAX_CAPTION_CHARS));
        }

        let request = self
            .client
            .post(self.config.api_url("sendPhoto"))
            .multipart(form);
        self.call::<serde_json::Value>("sendPhoto", request).await?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: &str) -> Result<(), ChannelError> {
        let request = self
            .client
            .post(self.config.api_url("sendChatAction"))
            .json(&serde_json::json!({ "chat_id": chat_id, "action": "typing" }));
        self.call::<bool>("sendChatAction", request).await?;
        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        if self.config.allowed_users.is_empty() {
            return false;
        }
        if self.config.allowed_users.iter().any(|u| u == "*") {
            return true;
        }
        let bare = sender_id.trim_start_matches('@');
        self.config
            .allowed_users
            .iter()
            .any(|u| u.trim_start_matches('@').eq_ignore_ascii_case(bare))
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        *self.inject_tx.lock().await = None;
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        let request = self.client.get(self.config.api_url("getMe"));
        let me: User = self.call("getMe", request).await?;
        debug!(bot = ?me.username, "Telegram getMe ok");
        Ok(true)
    }
}

/// Long-poll `getUpdates` until the receiver goes away.
async fn poll_updates(client: reqwest::Client, config: TelegramConfig, channel_id: ChannelId, tx: Inbox) {
    let mut offset: i64 = 0;
    loop {
        if tx.is_closed() {
            break;
        }
        let request = client.get(config.api_url("getUpdates")).query(&[
            ("timeout", config.poll_timeout_secs.to_string()),
            ("offset", offset.to_string()),
            ("allowed_updates", r#"["message"]"#.to_string()),
        ]);

        let updates = match fetch_updates(request).await {
            Ok(updates) => updates,
            Err(e) => {
                error!(error = %e, "Telegram getUpdates failed");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(msg) = to_channel_message(&channel_id, update) else {
                continue;
            };
            if tx.send(Ok(msg)).await.is_err() {
                return;
            }
        }
    }
    debug!("Telegram poller exiting");
}

async fn fetch_updates(request: reqwest::RequestBuilder) -> Result<Vec<Update>, ChannelError> {
    let response = request
        .send()
        .await
        .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
    let body: TelegramResponse<Vec<Update>> = response
        .json()
        .await
        .map_err(|e| ChannelError::InvalidPayload(format!("getUpdates: {e}")))?;
    body.into_result("getUpdates")
}

fn to_channel_message(channel_id: &ChannelId, update: Update) -> Option<ChannelMessage> {
    let message = update.message?;
    let Some(text) = message.text.or(message.caption) else {
        debug!(update_id = update.update_id, "Skipping non-text update");
        return None;
    };
    let Some(from) = message.from else {
        warn!(update_id = update.update_id, "Skipping message without sender");
        return None;
    };

    let mut metadata = serde_json::Map::new();
    metadata.insert("message_id".into(), message.message_id.into());
    if let Some(username) = &from.username {
        metadata.insert("username".into(), username.clone().into());
    }

    Some(ChannelMessage {
        channel_id: channel_id.clone(),
        sender_id: from.id.to_string(),
        sender_name: from.username.or(from.first_name),
        content: text,
        chat_id: message.chat.id.to_string(),
        metadata,
    })
}

/// Split `text` into pieces of at most `limit` characters, preferring
/// line breaks.
fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > limit {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(limit) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn sniff_image(bytes: &[u8]) -> (&'static str, &'static str) {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        ("image/png", "image.png")
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        ("image/webp", "image.webp")
    } else {
        ("image/jpeg", "image.jpg")
    }
}

// --- Bot API types (internal) ---

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

impl<T> TelegramResponse<T> {
    fn into_result(self, method: &str) -> Result<T, ChannelError> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(ChannelError::InvalidPayload(format!("{method}: empty result"))),
            (false, _) => Err(ChannelError::DeliveryFailed {
                channel: "telegram".into(),
                reason: format!(
                    "{method}: {}",
                    self.description.unwrap_or_else(|| "unknown error".into())
                ),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    username: Option<String>,
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}
