//! Per-conversation session state.
//!
//! A [`Session`] bundles one isolated browser context, its single active
//! page, a bounded interaction history, and the state machine position of
//! the conversation. Sessions are only ever touched through the store's
//! per-session gate, so every method here takes `&mut self` freely.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use browserclaw_core::capability::{BrowserCapability, PageState};
use browserclaw_core::decision::HistoryEntry;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, warn};

/// Where a session is in the perception-action cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Navigating,
    AwaitingDecision,
    ExecutingAction,
    GeneratingImage,
    /// Transient: a round failed. Always left for `Idle` within the same round.
    Failed,
}

impl SessionState {
    /// Legal edges of the state machine.
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, GeneratingImage) | (GeneratingImage, _) => true,
            (Idle, Navigating) | (Idle, AwaitingDecision) => true,
            (Navigating, Idle) | (Navigating, Failed) => true,
            (AwaitingDecision, ExecutingAction) | (AwaitingDecision, Idle) => true,
            (AwaitingDecision, Failed) => true,
            (ExecutingAction, Idle) | (ExecutingAction, Failed) => true,
            (Failed, Idle) => true,
            _ => false,
        }
    }
}

/// Point-in-time view of a session, for status output and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub identity: String,
    pub state: SessionState,
    pub turn_counter: u32,
    pub history_len: usize,
    pub has_browser: bool,
    pub page_url: Option<String>,
}

/// State of one conversation.
pub struct Session {
    identity: String,

    /// Exclusively owned browsing context (cookies/history scoped to this session)
    browser: Option<Box<dyn BrowserCapability>>,

    /// The single active page, set once a navigation has succeeded
    page: Option<PageState>,

    history: VecDeque<HistoryEntry>,
    history_limit: usize,

    state: SessionState,

    /// Completed rounds within the current multi-step task
    turn_counter: u32,

    /// Set when the store has dropped this session; holders must re-resolve.
    retired: bool,
}

impl Session {
    /// A fresh session: idle, no browser, empty history.
    pub fn new(identity: impl Into<String>, history_limit: usize) -> Self {
        Self {
            identity: identity.into(),
            browser: None,
            page: None,
            history: VecDeque::with_capacity(history_limit),
            history_limit: history_limit.max(1),
            state: SessionState::Idle,
            turn_counter: 0,
            retired: false,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move along the state machine.
    ///
    /// # Panics
    ///
    /// On an illegal edge. That can only happen if two rounds mutate the
    /// same session, which the per-session gate rules out.
    pub fn transition(&mut self, next: SessionState) {
        assert!(
            self.state.can_transition_to(next),
            "session {}: illegal transition {:?} -> {:?}",
            self.identity,
            self.state,
            next
        );
        debug!(identity = %self.identity, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    /// Bring a session whose round was abandoned part-way back to `Idle`.
    ///
    /// Returns whether anything had to be undone.
    pub(crate) fn settle_interrupted(&mut self) -> bool {
        let interrupted = self.state;
        match interrupted {
            SessionState::Idle => return false,
            SessionState::GeneratingImage | SessionState::Failed => {}
            _ => self.transition(SessionState::Failed),
        }
        self.transition(SessionState::Idle);
        warn!(identity = %self.identity, state = ?interrupted, "Round was cancelled, session back to idle");
        true
    }

    pub fn browser(&self) -> Option<&dyn BrowserCapability> {
        self.browser.as_deref()
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    pub(crate) fn attach_browser(&mut self, browser: Box<dyn BrowserCapability>) {
        self.browser = Some(browser);
        self.page = None;
    }

    pub fn page(&self) -> Option<&PageState> {
        self.page.as_ref()
    }

    pub(crate) fn set_page(&mut self, page: PageState) {
        self.page = Some(page);
    }

    /// A browser exists and has something loaded.
    pub fn has_live_page(&self) -> bool {
        self.browser.is_some() && self.page.is_some()
    }

    /// Append to history, evicting the oldest entries beyond the limit.
    pub(crate) fn record(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// The history in order, oldest first, for the decision model.
    pub fn history_tail(&self) -> Vec<HistoryEntry> {
        self.history.iter().cloned().collect()
    }

    pub fn last_entry(&self) -> Option<&HistoryEntry> {
        self.history.back()
    }

    pub fn turn_counter(&self) -> u32 {
        self.turn_counter
    }

    pub(crate) fn count_round(&mut self) {
        self.turn_counter += 1;
    }

    pub(crate) fn reset_turn_counter(&mut self) {
        self.turn_counter = 0;
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    /// Release the browser context, if any.
    ///
    /// Unconditional and idempotent: errors from the browser are logged,
    /// never returned, and a session without a browser is left untouched.
    pub async fn release_browser(&mut self) {
        self.page = None;
        let Some(browser) = self.browser.take() else {
            return;
        };
        if let Err(e) = browser.close().await {
            warn!(identity = %self.identity, error = %e, "Browser close reported an error");
        } else {
            debug!(identity = %self.identity, "Browser context released");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            identity: self.identity.clone(),
            state: self.state,
            turn_counter: self.turn_counter,
            history_len: self.history.len(),
            has_browser: self.browser.is_some(),
            page_url: self.page.as_ref().map(|p| p.url.clone()),
        }
    }
}

/// A held session gate.
///
/// If the holder goes away mid-round (its future was dropped), the session
/// is settled back to `Idle` so it keeps accepting instructions.
pub struct SessionLease(OwnedMutexGuard<Session>);

impl SessionLease {
    pub(crate) fn new(guard: OwnedMutexGuard<Session>) -> Self {
        Self(guard)
    }
}

impl Deref for SessionLease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.0
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.0
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.0.settle_interrupted();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("has_browser", &self.browser.is_some())
            .field("page", &self.page)
            .field("history_len", &self.history.len())
            .field("turn_counter", &self.turn_counter)
            .field("retired", &self.retired)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browserclaw_core::decision::Outcome;
    use browserclaw_core::intent::{ActionIntent, IntentKind};

    fn entry(n: u32) -> HistoryEntry {
        HistoryEntry {
            instruction: format!("step {n}"),
            intent: ActionIntent::new(IntentKind::Scroll { dy: 500 }, ""),
            outcome: Outcome::Success,
        }
    }

    #[test]
    fn new_session_is_idle_and_empty() {
        let s = Session::new("telegram:1", 5);
        assert_eq!(s.state(), SessionState::Idle);
        assert!(!s.has_browser());
        assert!(!s.has_live_page());
        assert_eq!(s.history_len(), 0);
        assert_eq!(s.turn_counter(), 0);
    }

    #[test]
    fn history_is_bounded_oldest_first() {
        let mut s = Session::new("cli", 3);
        for n in 0..5 {
            s.record(entry(n));
        }
        let kept: Vec<_> = s.history().map(|e| e.instruction.clone()).collect();
        assert_eq!(kept, vec!["step 2", "step 3", "step 4"]);
        assert_eq!(s.last_entry().unwrap().instruction, "step 4");
    }

    #[test]
    fn legal_round_trip_transitions() {
        let mut s = Session::new("cli", 3);
        s.transition(SessionState::Navigating);
        s.transition(SessionState::Failed);
        s.transition(SessionState::Idle);
        s.transition(SessionState::AwaitingDecision);
        s.transition(SessionState::ExecutingAction);
        s.transition(SessionState::Idle);
        s.transition(SessionState::GeneratingImage);
        s.transition(SessionState::Idle);
    }

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn illegal_transition_is_loud() {
        let mut s = Session::new("cli", 3);
        s.transition(SessionState::ExecutingAction);
    }

    #[test]
    fn interrupted_rounds_settle_to_idle() {
        let paths: [&[SessionState]; 4] = [
            &[SessionState::Navigating],
            &[SessionState::AwaitingDecision],
            &[SessionState::AwaitingDecision, SessionState::ExecutingAction],
            &[SessionState::GeneratingImage],
        ];
        for path in paths {
            let mut s = Session::new("cli", 3);
            for state in path {
                s.transition(*state);
            }
            assert!(s.settle_interrupted(), "{path:?}");
            assert_eq!(s.state(), SessionState::Idle);
            // The next round starts normally.
            s.transition(SessionState::AwaitingDecision);
        }

        let mut idle = Session::new("cli", 3);
        assert!(!idle.settle_interrupted());
    }

    #[tokio::test]
    async fn dropped_lease_leaves_session_idle() {
        let shared = std::sync::Arc::new(tokio::sync::Mutex::new(Session::new("cli", 3)));
        {
            let mut lease = SessionLease::new(std::sync::Arc::clone(&shared).lock_owned().await);
            lease.transition(SessionState::AwaitingDecision);
            lease.transition(SessionState::ExecutingAction);
        }
        assert_eq!(shared.lock().await.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn release_without_browser_is_noop() {
        let mut s = Session::new("cli", 3);
        s.release_browser().await;
        s.release_browser().await;
        assert!(!s.has_browser());
    }
}
