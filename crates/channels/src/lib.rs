//! Chat transports for BrowserClaw.
//!
//! Each channel connects to a chat platform and relays messages to and
//! from the agent loop. The dispatcher turns raw message text into a
//! command or a classified request.
//!
//! Available channels:
//! - **Telegram**: Bot API long polling, photos via multipart upload
//! - **CLI**: interactive terminal chat, images saved to disk

pub mod cli;
pub mod dispatcher;
pub mod telegram;

pub use cli::CliChannel;
pub use dispatcher::{Command, classify};
pub use telegram::{TelegramChannel, TelegramConfig};
