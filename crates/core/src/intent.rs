//! The action-intent protocol between the vision model and the agent loop.
//!
//! The model answers every round with one JSON object describing a single
//! browser action. This module turns that loosely-typed output into the
//! closed [`IntentKind`] set. Anything that does not map cleanly becomes
//! [`IntentKind::Unrecognized`]; coordinates and other arguments are never
//! guessed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scroll distance used when the model only gives a direction.
pub const DEFAULT_SCROLL_STEP: i32 = 500;

/// Upper bound for a model-requested wait.
pub const MAX_WAIT_MS: u64 = 10_000;

/// What the model wants the browser to do next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IntentKind {
    /// Load a URL in the session's page.
    Navigate { url: String },
    /// Click at viewport coordinates.
    Click { x: u32, y: u32 },
    /// Type text into the focused element.
    Type { text: String },
    /// Scroll vertically; positive is down.
    Scroll { dy: i32 },
    /// Let the page settle.
    Wait { ms: u64 },
    /// Press a named key such as `Enter`.
    PressKey { key: String },
    /// Reply to the user from what is visible; ends the task.
    Answer { text: String },
    /// The task is complete.
    Done,
    /// The model could not translate the instruction into an action.
    Unrecognized { reason: String },
}

impl IntentKind {
    /// Short lowercase name, used in logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Scroll { .. } => "scroll",
            Self::Wait { .. } => "wait",
            Self::PressKey { .. } => "press_key",
            Self::Answer { .. } => "answer",
            Self::Done => "done",
            Self::Unrecognized { .. } => "unrecognized",
        }
    }

    /// Whether executing this intent calls a browser primitive.
    pub fn is_browser_action(&self) -> bool {
        matches!(
            self,
            Self::Navigate { .. }
                | Self::Click { .. }
                | Self::Type { .. }
                | Self::Scroll { .. }
                | Self::Wait { .. }
                | Self::PressKey { .. }
        )
    }

    /// Whether this intent ends a multi-round task successfully.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Answer { .. })
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Navigate { url } => write!(f, "navigate to {url}"),
            Self::Click { x, y } => write!(f, "click at ({x}, {y})"),
            Self::Type { text } => write!(f, "type {text:?}"),
            Self::Scroll { dy } if *dy >= 0 => write!(f, "scroll down {dy}px"),
            Self::Scroll { dy } => write!(f, "scroll up {}px", dy.unsigned_abs()),
            Self::Wait { ms } => write!(f, "wait {ms}ms"),
            Self::PressKey { key } => write!(f, "press {key}"),
            Self::Answer { .. } => write!(f, "answer"),
            Self::Done => write!(f, "done"),
            Self::Unrecognized { reason } => write!(f, "unrecognized ({reason})"),
        }
    }
}

/// One structured decision of the vision model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionIntent {
    pub kind: IntentKind,

    /// Free text from the model. Logged, never used for control flow.
    #[serde(default)]
    pub rationale: String,
}

/// Knobs applied while mapping raw model output to an intent.
#[derive(Debug, Clone, Copy)]
pub struct IntentParseOptions {
    /// Pixels scrolled for `"direction": "up" | "down"`.
    pub scroll_step: i32,
    /// Waits longer than this are clamped.
    pub max_wait_ms: u64,
}

impl Default for IntentParseOptions {
    fn default() -> Self {
        Self {
            scroll_step: DEFAULT_SCROLL_STEP,
            max_wait_ms: MAX_WAIT_MS,
        }
    }
}

/// The loose wire shape the model is asked to produce.
#[derive(Debug, Default, Deserialize)]
struct RawDecision {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    coordinates: Option<Vec<Value>>,
    #[serde(default)]
    x: Option<Value>,
    #[serde(default)]
    y: Option<Value>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    dy: Option<Value>,
    #[serde(default)]
    ms: Option<Value>,
    #[serde(default, alias = "rationale", alias = "reason")]
    reasoning: Option<String>,
}

impl ActionIntent {
    pub fn new(kind: IntentKind, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            rationale: rationale.into(),
        }
    }

    /// An unrecognized intent carrying the reason the mapping failed.
    pub fn unrecognized(reason: impl Into<String>) -> Self {
        Self::new(
            IntentKind::Unrecognized {
                reason: reason.into(),
            },
            "",
        )
    }

    /// Map raw model text to an intent. Never fails: anything that does not
    /// parse into exactly one well-formed action is `Unrecognized`.
    pub fn from_model_output(raw: &str, options: &IntentParseOptions) -> Self {
        let cleaned = strip_code_fences(raw);
        if cleaned.is_empty() {
            return Self::unrecognized("empty model response");
        }

        let decision: RawDecision = match serde_json::from_str(cleaned) {
            Ok(d) => d,
            Err(e) => return Self::unrecognized(format!("invalid JSON from model: {e}")),
        };

        let rationale = decision.reasoning.clone().unwrap_or_default();
        match map_decision(decision, options) {
            Ok(kind) => Self::new(kind, rationale),
            Err(reason) => Self::new(IntentKind::Unrecognized { reason }, rationale),
        }
    }
}

fn map_decision(d: RawDecision, options: &IntentParseOptions) -> Result<IntentKind, String> {
    let action = d
        .action
        .as_deref()
        .map(|a| a.trim().to_ascii_lowercase())
        .ok_or_else(|| "response has no \"action\" field".to_string())?;

    match action.as_str() {
        "navigate" | "goto" | "open" => {
            let url = non_empty(d.url.or(d.text)).ok_or("navigate without a url")?;
            Ok(IntentKind::Navigate { url: url.trim().to_string() })
        }
        "click" => {
            let (x, y) = coordinates(&d)?;
            Ok(IntentKind::Click { x, y })
        }
        "type" => {
            let text = non_empty(d.text).ok_or("type without text")?;
            Ok(IntentKind::Type { text })
        }
        "scroll" => {
            let dy = match (&d.dy, d.direction.as_deref()) {
                (Some(v), _) => {
                    let dy = v
                        .as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or("scroll dy is not an integer")?;
                    if dy == 0 {
                        return Err("scroll dy is zero".into());
                    }
                    dy
                }
                (None, Some(dir)) => match dir.trim().to_ascii_lowercase().as_str() {
                    "down" => options.scroll_step,
                    "up" => -options.scroll_step,
                    other => return Err(format!("unknown scroll direction '{other}'")),
                },
                (None, None) => options.scroll_step,
            };
            Ok(IntentKind::Scroll { dy })
        }
        "wait" => {
            let ms = d
                .ms
                .as_ref()
                .and_then(Value::as_u64)
                .ok_or("wait without a millisecond duration")?;
            Ok(IntentKind::Wait {
                ms: ms.min(options.max_wait_ms),
            })
        }
        "key" | "press_key" | "press" => {
            let key = non_empty(d.key.or(d.text)).ok_or("key press without a key")?;
            Ok(IntentKind::PressKey { key: key.trim().to_string() })
        }
        "answer" => {
            let text = non_empty(d.text).ok_or("answer without text")?;
            Ok(IntentKind::Answer { text })
        }
        "done" | "finish" | "complete" => Ok(IntentKind::Done),
        "unrecognized" | "unknown" | "none" => Err(non_empty(d.reasoning)
            .unwrap_or_else(|| "model could not map the instruction to an action".into())),
        other => Err(format!("unknown action '{other}'")),
    }
}

fn coordinates(d: &RawDecision) -> Result<(u32, u32), String> {
    let (x, y) = match (&d.coordinates, &d.x, &d.y) {
        (Some(pair), _, _) if pair.len() == 2 => (&pair[0], &pair[1]),
        (Some(pair), _, _) => {
            return Err(format!("click needs 2 coordinates, got {}", pair.len()));
        }
        (None, Some(x), Some(y)) => (x, y),
        _ => return Err("click without coordinates".into()),
    };
    Ok((coordinate(x)?, coordinate(y)?))
}

fn coordinate(v: &Value) -> Result<u32, String> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| format!("invalid coordinate {v}"))
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

/// Strip a surrounding Markdown code fence (```json ... ```), if any.
pub(crate) fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest.trim_start_matches("json"),
    };
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ActionIntent {
        ActionIntent::from_model_output(raw, &IntentParseOptions::default())
    }

    fn is_unrecognized(intent: &ActionIntent) -> bool {
        matches!(intent.kind, IntentKind::Unrecognized { .. })
    }

    #[test]
    fn click_with_coordinate_pair() {
        let intent = parse(
            r#"{"action":"click","coordinates":[120,340],"reasoning":"login button"}"#,
        );
        assert_eq!(intent.kind, IntentKind::Click { x: 120, y: 340 });
        assert_eq!(intent.rationale, "login button");
    }

    #[test]
    fn click_with_x_and_y_fields() {
        let intent = parse(r#"{"action":"click","x":5,"y":7}"#);
        assert_eq!(intent.kind, IntentKind::Click { x: 5, y: 7 });
    }

    #[test]
    fn fenced_json_is_accepted() {
        let intent = parse("```json\n{\"action\":\"done\",\"reasoning\":\"finished\"}\n```");
        assert_eq!(intent.kind, IntentKind::Done);
        assert_eq!(intent.rationale, "finished");
    }

    #[test]
    fn prose_is_unrecognized() {
        let intent = parse("I think you should click the blue button.");
        assert!(is_unrecognized(&intent));
    }

    #[test]
    fn coordinates_are_never_guessed() {
        assert!(is_unrecognized(&parse(r#"{"action":"click"}"#)));
        assert!(is_unrecognized(&parse(r#"{"action":"click","coordinates":[10]}"#)));
        assert!(is_unrecognized(&parse(r#"{"action":"click","coordinates":[-3,40]}"#)));
        assert!(is_unrecognized(&parse(r#"{"action":"click","coordinates":[10.5,40]}"#)));
        assert!(is_unrecognized(&parse(r#"{"action":"click","coordinates":["10","40"]}"#)));
    }

    #[test]
    fn navigate_takes_url_or_text() {
        let a = parse(r#"{"action":"navigate","url":"https://duckduckgo.com/"}"#);
        let b = parse(r#"{"action":"navigate","text":" https://duckduckgo.com/ "}"#);
        let expected = IntentKind::Navigate {
            url: "https://duckduckgo.com/".into(),
        };
        assert_eq!(a.kind, expected);
        assert_eq!(b.kind, expected);
        assert!(is_unrecognized(&parse(r#"{"action":"navigate","text":"  "}"#)));
    }

    #[test]
    fn scroll_direction_uses_step() {
        let options = IntentParseOptions {
            scroll_step: 300,
            ..IntentParseOptions::default()
        };
        let up = ActionIntent::from_model_output(r#"{"action":"scroll","direction":"up"}"#, &options);
        assert_eq!(up.kind, IntentKind::Scroll { dy: -300 });
        let default = ActionIntent::from_model_output(r#"{"action":"scroll"}"#, &options);
        assert_eq!(default.kind, IntentKind::Scroll { dy: 300 });
    }

    #[test]
    fn scroll_explicit_dy_wins() {
        let intent = parse(r#"{"action":"scroll","dy":-120,"direction":"down"}"#);
        assert_eq!(intent.kind, IntentKind::Scroll { dy: -120 });
        assert!(is_unrecognized(&parse(r#"{"action":"scroll","direction":"sideways"}"#)));
    }

    #[test]
    fn wait_is_clamped() {
        let intent = parse(r#"{"action":"wait","ms":600000}"#);
        assert_eq!(intent.kind, IntentKind::Wait { ms: MAX_WAIT_MS });
        assert!(is_unrecognized(&parse(r#"{"action":"wait"}"#)));
    }

    #[test]
    fn key_press_and_answer() {
        let key = parse(r#"{"action":"key","key":"Enter"}"#);
        assert_eq!(key.kind, IntentKind::PressKey { key: "Enter".into() });

        let answer = parse(r#"{"action":"answer","text":"The price is $42."}"#);
        assert!(answer.kind.is_terminal());
        assert!(!answer.kind.is_browser_action());
    }

    #[test]
    fn unknown_action_is_unrecognized_with_reason() {
        let intent = parse(r#"{"action":"backflip","reasoning":"fun"}"#);
        match intent.kind {
            IntentKind::Unrecognized { reason } => assert!(reason.contains("backflip")),
            other => panic!("expected unrecognized, got {other:?}"),
        }
        assert_eq!(intent.rationale, "fun");
    }

    #[test]
    fn explicit_unrecognized_keeps_model_reason() {
        let intent = parse(r#"{"action":"unrecognized","reasoning":"no such element"}"#);
        assert_eq!(
            intent.kind,
            IntentKind::Unrecognized {
                reason: "no such element".into()
            }
        );
    }

    #[test]
    fn intent_serializes_with_action_tag() {
        let intent = ActionIntent::new(IntentKind::Click { x: 1, y: 2 }, "why");
        let json = serde_json::to_string(&intent).unwrap();
        assert!(json.contains(r#""action":"click""#));
    }
}
