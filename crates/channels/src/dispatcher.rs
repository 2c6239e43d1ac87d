//! Message dispatch: raw chat text → command or classified request.
//!
//! Slash commands follow the Telegram convention, including the
//! `/command@botname` form used in group chats. Anything that is not a
//! command is an instruction for the current page, except text starting
//! with "generate image", which asks for a picture.

use browserclaw_core::Classification;

const IMAGE_PREFIX: &str = "generate image";

pub const WELCOME: &str = "Welcome to BrowserClaw! Use /browse <url> to start, or just chat with me!";

pub const HELP: &str = "Commands:
/browse <url> - open a page
/task <goal> - let me work through several steps on my own
/image <prompt> - generate an image
/reset - close the browser and start over
/help - show this message

Anything else is an instruction for the open page, e.g. \"click the login button\".
Start a message with \"generate image\" to get a picture instead.";

/// What a chat message asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    /// Close this conversation's browser and forget its history.
    Reset,
    /// Multi-round autonomous task on the open page.
    Task { goal: String },
    /// A single agent loop operation.
    Classified(Classification),
    /// Malformed command; reply with the usage text.
    Usage(String),
}

/// Classify one incoming message.
pub fn classify(text: &str) -> Command {
    let text = text.trim();

    if let Some(rest) = text.strip_prefix('/') {
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        // `/browse@my_bot example.com` in group chats
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        return command(&name, args);
    }

    if let Some(prompt) = strip_word_prefix(text, IMAGE_PREFIX) {
        let prompt = prompt.trim_start_matches([':', ' ']).trim();
        if prompt.is_empty() {
            return Command::Usage("Tell me what to draw, e.g. \"generate image of a red fox\".".into());
        }
        return Command::Classified(Classification::GenerateImage {
            prompt: prompt.to_string(),
        });
    }

    Command::Classified(Classification::Instruct {
        text: text.to_string(),
    })
}

fn command(name: &str, args: &str) -> Command {
    match name {
        "start" => Command::Start,
        "help" => Command::Help,
        "reset" | "stop" => Command::Reset,
        "browse" | "open" => {
            if args.is_empty() {
                Command::Usage("Please provide a URL. Usage: /browse <url>".into())
            } else {
                Command::Classified(Classification::Browse {
                    url: args.to_string(),
                })
            }
        }
        "task" => {
            if args.is_empty() {
                Command::Usage("Please describe the goal. Usage: /task <goal>".into())
            } else {
                Command::Task {
                    goal: args.to_string(),
                }
            }
        }
        "image" => {
            if args.is_empty() {
                Command::Usage("Please describe the picture. Usage: /image <prompt>".into())
            } else {
                Command::Classified(Classification::GenerateImage {
                    prompt: args.to_string(),
                })
            }
        }
        other => Command::Usage(format!("Unknown command /{other}. Send /help for the list.")),
    }
}

/// Case-insensitive prefix match that must end at whitespace, `:` or the end of text.
fn strip_word_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    let rest = &text[prefix.len()..];
    let at_boundary = rest
        .chars()
        .next()
        .is_none_or(|c| c.is_whitespace() || c == ':');
    (head.eq_ignore_ascii_case(prefix) && at_boundary).then_some(rest)
}
