//! The agent loop of BrowserClaw: sessions, gates, and rounds.
//!
//! Each conversation owns a [`Session`] in the [`SessionStore`]. The
//! [`AgentLoop`] drives a session through one **Capture → Decide → Act →
//! Observe** round per instruction:
//!
//! 1. **Capture** a screenshot of the session's page
//! 2. **Decide**: the vision model turns screenshot + instruction into one intent
//! 3. **Act** on the intent through the browser capability
//! 4. **Observe**: a fresh screenshot goes back to the human
//!
//! Rounds for one session never overlap; rounds for different sessions run
//! in parallel.

pub mod loop_runner;
pub mod navigation;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use loop_runner::AgentLoop;
pub use navigation::normalize_url;
pub use session::{Session, SessionLease, SessionSnapshot, SessionState};
pub use store::{SessionStore, SharedSession};
