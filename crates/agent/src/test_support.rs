//! Scripted collaborators for exercising the agent loop without a real
//! browser or model. Built for this crate's tests and, through the
//! `test-support` feature, for the bot runtime's.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use browserclaw_core::capability::{BrowserCapability, BrowserLauncher, PageState};
use browserclaw_core::decision::{HistoryEntry, VisionDecider};
use browserclaw_core::error::{CapabilityError, DecisionError, GenerationError};
use browserclaw_core::event::EventBus;
use browserclaw_core::generation::{GeneratedImage, ImageGenerator};
use browserclaw_core::intent::{ActionIntent, IntentKind};
use browserclaw_core::plan::{PlanRevision, TaskPlan};

use crate::loop_runner::AgentLoop;
use crate::store::SessionStore;

/// Bytes every mock screenshot returns.
pub const MOCK_SCREENSHOT: &[u8] = b"\xFF\xD8mock-jpeg";

/// How mock browsers misbehave.
#[derive(Debug, Clone, Default)]
pub struct BrowserScript {
    /// Navigations to URLs containing any of these fail.
    pub fail_navigation_to: Vec<String>,
    /// Every click/type/scroll/key/wait fails.
    pub fail_actions: bool,
    /// Every action sleeps this long first.
    pub action_delay: Option<Duration>,
    /// Launching a context fails.
    pub fail_launch: bool,
}

#[derive(Default)]
struct Shared {
    log: Mutex<Vec<String>>,
    launches: AtomicUsize,
    closes: AtomicUsize,
    overlapped: AtomicBool,
}

impl Shared {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

/// Launcher handing out [`MockBrowser`]s that all log into one call log.
#[derive(Default)]
pub struct MockLauncher {
    shared: Arc<Shared>,
    script: BrowserScript,
}

impl MockLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: BrowserScript) -> Self {
        Self {
            shared: Arc::default(),
            script,
        }
    }

    /// Every capability call so far, in order, e.g. `"click 120,340"`.
    pub fn calls(&self) -> Vec<String> {
        self.shared.log.lock().unwrap().clone()
    }

    /// Calls other than screenshots.
    pub fn actions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c != "screenshot" && c != "close")
            .collect()
    }

    pub fn launches(&self) -> usize {
        self.shared.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Whether two calls on the same browser ever ran at once.
    pub fn overlapped(&self) -> bool {
        self.shared.overlapped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn launch(&self) -> Result<Box<dyn BrowserCapability>, CapabilityError> {
        if self.script.fail_launch {
            return Err(CapabilityError::Launch("mock launcher refused".into()));
        }
        self.shared.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockBrowser {
            shared: Arc::clone(&self.shared),
            script: self.script.clone(),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One mock browsing context.
pub struct MockBrowser {
    shared: Arc<Shared>,
    script: BrowserScript,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl MockBrowser {
    async fn call(&self, entry: String, is_action: bool) -> Result<(), CapabilityError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CapabilityError::Closed);
        }
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.shared.overlapped.store(true, Ordering::SeqCst);
        }
        self.shared.push(entry.clone());

        if is_action {
            if let Some(delay) = self.script.action_delay {
                tokio::time::sleep(delay).await;
            }
        }
        // Give concurrent callers a chance to interleave.
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if is_action && self.script.fail_actions {
            return Err(CapabilityError::Action {
                action: entry,
                reason: "element not interactable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserCapability for MockBrowser {
    async fn navigate(&self, url: &str) -> Result<PageState, CapabilityError> {
        self.call(format!("navigate {url}"), false).await?;
        if self.script.fail_navigation_to.iter().any(|bad| url.contains(bad)) {
            return Err(CapabilityError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_NAME_NOT_RESOLVED".into(),
            });
        }
        Ok(PageState {
            url: url.to_string(),
            title: "Mock Page".into(),
        })
    }

    async fn screenshot(&self) -> Result<Vec<u8>, CapabilityError> {
        self.call("screenshot".into(), false).await?;
        Ok(MOCK_SCREENSHOT.to_vec())
    }

    async fn click(&self, x: u32, y: u32) -> Result<(), CapabilityError> {
        self.call(format!("click {x},{y}"), true).await
    }

    async fn type_text(&self, text: &str) -> Result<(), CapabilityError> {
        self.call(format!("type {text}"), true).await
    }

    async fn press_key(&self, key: &str) -> Result<(), CapabilityError> {
        self.call(format!("key {key}"), true).await
    }

    async fn scroll(&self, dy: i32) -> Result<(), CapabilityError> {
        self.call(format!("scroll {dy}"), true).await
    }

    async fn wait(&self, ms: u64) -> Result<(), CapabilityError> {
        self.call(format!("wait {ms}"), true).await
    }

    async fn close(&self) -> Result<(), CapabilityError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            self.shared.push("close".into());
        }
        Ok(())
    }
}

/// What the decider saw on one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionCall {
    pub instruction: String,
    pub screenshot_len: usize,
    pub history_len: usize,
}

/// What the decider was asked to plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCall {
    pub goal: String,
    /// Set when an earlier plan was being revised.
    pub feedback: Option<String>,
}

/// A decider that replays a fixed script.
///
/// Once the script runs out it repeats the fallback intent if one is set,
/// otherwise it answers `Done`. Plans come from a separate script and are
/// direct once it runs out.
pub struct ScriptedDecider {
    script: Mutex<VecDeque<Result<ActionIntent, DecisionError>>>,
    fallback: Option<ActionIntent>,
    delay: Option<Duration>,
    calls: Mutex<Vec<DecisionCall>>,
    plans: Mutex<VecDeque<Result<TaskPlan, DecisionError>>>,
    plan_calls: Mutex<Vec<PlanCall>>,
}

impl ScriptedDecider {
    pub fn new(script: Vec<Result<ActionIntent, DecisionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
            plans: Mutex::new(VecDeque::new()),
            plan_calls: Mutex::new(Vec::new()),
        }
    }

    /// Script of intents only.
    pub fn intents(intents: Vec<ActionIntent>) -> Self {
        Self::new(intents.into_iter().map(Ok).collect())
    }

    /// Always answers `intent`.
    pub fn repeating(intent: ActionIntent) -> Self {
        let mut decider = Self::new(Vec::new());
        decider.fallback = Some(intent);
        decider
    }

    /// Sleep before every answer.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answers for successive `plan` calls.
    pub fn with_plans(self, plans: Vec<Result<TaskPlan, DecisionError>>) -> Self {
        *self.plans.lock().unwrap() = plans.into();
        self
    }

    pub fn calls(&self) -> Vec<DecisionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn plan_calls(&self) -> Vec<PlanCall> {
        self.plan_calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl VisionDecider for ScriptedDecider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn decide(
        &self,
        screenshot: &[u8],
        instruction: &str,
        history: &[HistoryEntry],
    ) -> Result<ActionIntent, DecisionError> {
        self.calls.lock().unwrap().push(DecisionCall {
            instruction: instruction.to_string(),
            screenshot_len: screenshot.len(),
            history_len: history.len(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(answer) => answer,
            None => Ok(self
                .fallback
                .clone()
                .unwrap_or_else(|| intent(IntentKind::Done))),
        }
    }

    async fn plan(&self, goal: &str, revision: Option<PlanRevision<'_>>) -> Result<TaskPlan, DecisionError> {
        self.plan_calls.lock().unwrap().push(PlanCall {
            goal: goal.to_string(),
            feedback: revision.map(|r| r.feedback.to_string()),
        });
        let next = self.plans.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(TaskPlan::direct()))
    }
}

/// An image generator with a canned answer.
pub struct CannedGenerator {
    answer: Result<Vec<u8>, String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CannedGenerator {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            answer: Ok(bytes.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            answer: Err(message.into()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for CannedGenerator {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, _prompt: &str) -> Result<GeneratedImage, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.answer {
            Ok(bytes) => Ok(GeneratedImage {
                bytes: bytes.clone(),
                mime_type: "image/png".into(),
            }),
            Err(message) => Err(GenerationError::ApiError {
                status_code: 500,
                message: message.clone(),
            }),
        }
    }
}

/// An intent with an empty rationale.
pub fn intent(kind: IntentKind) -> ActionIntent {
    ActionIntent::new(kind, "")
}

/// An agent loop over the given doubles with an unbounded store.
pub fn agent(launcher: Arc<MockLauncher>, decider: Arc<ScriptedDecider>) -> AgentLoop {
    let bus = Arc::new(EventBus::default());
    let store = Arc::new(SessionStore::new(10, 0, Arc::clone(&bus)));
    AgentLoop::new(store, launcher, decider, bus)
}
