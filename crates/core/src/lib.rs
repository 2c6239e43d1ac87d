//! # BrowserClaw Core
//!
//! Domain types, collaborator traits, and error definitions for the
//! BrowserClaw vision browsing agent. This crate has **no framework
//! dependencies**: it defines the model that every other crate implements
//! against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator of the agent loop is a trait here:
//! - [`BrowserLauncher`] / [`BrowserCapability`] — the browser automation engine
//! - [`VisionDecider`] — screenshot + instruction → [`ActionIntent`]
//! - [`ImageGenerator`] — prompt → image bytes
//! - [`Channel`] — the chat transport
//!
//! Implementations live in their respective crates, and tests swap in
//! scripted doubles.

pub mod capability;
pub mod channel;
pub mod classification;
pub mod decision;
pub mod error;
pub mod event;
pub mod generation;
pub mod intent;
pub mod plan;
pub mod turn;

// Re-export key types at crate root for ergonomics
pub use capability::{BrowserCapability, BrowserLauncher, PageState};
pub use channel::{Channel, ChannelId, ChannelMessage};
pub use classification::Classification;
pub use decision::{HistoryEntry, Outcome, VisionDecider};
pub use error::{
    CapabilityError, ChannelError, DecisionError, Error, GenerationError, Result, UsageError,
};
pub use event::{DomainEvent, EventBus};
pub use generation::{GeneratedImage, ImageGenerator};
pub use intent::{ActionIntent, IntentKind, IntentParseOptions};
pub use plan::{PlanRevision, TaskPlan};
pub use turn::{TurnResult, TurnStatus};
