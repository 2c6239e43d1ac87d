//! The agent loop: one perception-decision-action round per instruction.
//!
//! A round for an instruction looks like this:
//!
//! 1. **Capture** the page the session has open
//! 2. **Decide**: screenshot + instruction + history go to the vision model,
//!    which answers with exactly one [`ActionIntent`]
//! 3. **Act** on the intent through the browser capability
//! 4. **Observe**: capture a fresh screenshot and hand back a [`TurnResult`]
//!
//! Every collaborator call is bounded by its own timeout. Failures never
//! escape as errors: they come back as a `TurnResult` the transport can
//! render, and the session is always left idle and usable.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use browserclaw_config::{BusyPolicy, TimeoutConfig};
use browserclaw_core::capability::{BrowserLauncher, PageState};
use browserclaw_core::classification::Classification;
use browserclaw_core::decision::{HistoryEntry, Outcome, VisionDecider};
use browserclaw_core::error::{CapabilityError, DecisionError, GenerationError, UsageError};
use browserclaw_core::event::{DomainEvent, EventBus};
use browserclaw_core::generation::ImageGenerator;
use browserclaw_core::intent::{ActionIntent, IntentKind};
use browserclaw_core::plan::{PlanRevision, TaskPlan};
use browserclaw_core::turn::TurnResult;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::navigation::normalize_url;
use crate::session::{Session, SessionLease, SessionState};
use crate::store::{SessionStore, SharedSession};

/// How many times one task may revise its plan after failed actions.
const MAX_PLAN_REVISIONS: u32 = 2;

/// How a decide-then-act round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    /// A browser action ran successfully; a task may continue.
    Acted,
    /// A browser action failed; a task may re-plan and continue.
    ActionFailed,
    /// The model declared the goal reached.
    Finished,
    /// Nothing more can happen without the human.
    Stalled,
}

/// Orchestrates sessions, the browser, and the models.
pub struct AgentLoop {
    store: Arc<SessionStore>,

    /// Creates one isolated browser context per session
    launcher: Arc<dyn BrowserLauncher>,

    /// The screenshot-reading model
    decider: Arc<dyn VisionDecider>,

    /// Optional; image requests are unsupported without one
    generator: Option<Arc<dyn ImageGenerator>>,

    timeouts: TimeoutConfig,

    /// Upper bound on rounds in one multi-round task
    max_rounds: u32,

    on_busy: BusyPolicy,

    event_bus: Arc<EventBus>,
}

impl AgentLoop {
    /// Create a new agent loop with default timeouts and a queueing gate.
    pub fn new(
        store: Arc<SessionStore>,
        launcher: Arc<dyn BrowserLauncher>,
        decider: Arc<dyn VisionDecider>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            launcher,
            decider,
            generator: None,
            timeouts: TimeoutConfig::default(),
            max_rounds: 10,
            on_busy: BusyPolicy::Queue,
            event_bus,
        }
    }

    /// Enable image generation.
    pub fn with_image_generator(mut self, generator: Arc<dyn ImageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the maximum number of rounds a multi-round task may run.
    pub fn with_max_rounds(mut self, max: u32) -> Self {
        self.max_rounds = max;
        self
    }

    /// Choose what happens to requests for a session that is mid-round.
    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.on_busy = policy;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Run one classified request for a conversation.
    pub async fn handle(&self, identity: &str, classification: Classification) -> TurnResult {
        info!(identity, kind = classification.name(), "Handling request");
        match classification {
            Classification::GenerateImage { prompt } => self.generate_image(identity, &prompt).await,
            Classification::Browse { url } => match self.acquire(identity).await {
                Ok(mut session) => self.browse(&mut session, &url).await,
                Err(e) => usage_result(&e),
            },
            Classification::Instruct { text } => match self.acquire_existing(identity).await {
                Ok(Some(mut session)) => {
                    // A human instruction starts a new top-level task.
                    session.reset_turn_counter();
                    self.instruct_round(&mut session, &text).await.0
                }
                Ok(None) => no_page_result(),
                Err(e) => usage_result(&e),
            },
        }
    }

    /// Drop the conversation's session and release its browser.
    pub async fn reset(&self, identity: &str) -> TurnResult {
        if self.store.reset(identity).await {
            TurnResult::ok("Session reset. The browser was closed; send /browse <url> to start over.")
        } else {
            TurnResult::ok("Nothing to reset, no browser session is open.")
        }
    }

    /// Pursue `goal` over several rounds, streaming one result per round.
    ///
    /// The decider first outlines a plan, which every round's instruction
    /// carries. A failed action revises the plan (at most
    /// `MAX_PLAN_REVISIONS` times) instead of ending the task.
    ///
    /// Stops when the model reports the goal reached, when a round cannot
    /// proceed without the human, or after `max_rounds` rounds of this task.
    /// The gate is released between rounds, so a reset or a human
    /// instruction can interleave without affecting the task's round count.
    pub fn run_task(self: &Arc<Self>, identity: &str, goal: &str) -> mpsc::Receiver<TurnResult> {
        let (tx, rx) = mpsc::channel(32);
        let agent = Arc::clone(self);
        let identity = identity.to_string();
        let goal = goal.trim().to_string();

        tokio::spawn(async move {
            agent.drive_task(&identity, &goal, &tx).await;
        });

        rx
    }

    async fn drive_task(&self, identity: &str, goal: &str, tx: &mpsc::Sender<TurnResult>) {
        if goal.is_empty() {
            let _ = tx
                .send(TurnResult::needs_more_input(
                    "Give the task a goal, e.g. /task find the weather in Paris",
                ))
                .await;
            return;
        }

        info!(identity, goal, max_rounds = self.max_rounds, "Starting multi-round task");
        let mut first = true;
        let mut rounds: u32 = 0;
        let mut revisions: u32 = 0;
        let mut plan: Option<TaskPlan> = None;
        let mut setback: Option<String> = None;
        let mut last: Option<HistoryEntry> = None;

        loop {
            let mut session = match self.acquire_existing(identity).await {
                Ok(Some(session)) => session,
                Ok(None) => {
                    let _ = tx.send(no_page_result()).await;
                    return;
                }
                Err(e) => {
                    let _ = tx.send(usage_result(&e)).await;
                    return;
                }
            };

            if first {
                session.reset_turn_counter();
                first = false;
            }

            if rounds >= self.max_rounds {
                drop(session);
                info!(identity, rounds, "Task stopped at round limit");
                let _ = tx
                    .send(TurnResult::needs_more_input(format!(
                        "Stopped after {rounds} steps without finishing. \
                         Send another instruction or /task to keep going."
                    )))
                    .await;
                return;
            }

            if session.has_live_page() && (plan.is_none() || setback.is_some()) {
                let feedback = setback.take();
                let revised = self
                    .plan_task(identity, goal, plan.as_ref(), feedback.as_deref())
                    .await;
                plan = Some(revised);
            }

            let instruction = task_instruction(goal, plan.as_ref(), last.as_ref());
            let (result, end) = self.instruct_round(&mut session, &instruction).await;
            if matches!(end, RoundEnd::Acted | RoundEnd::ActionFailed) {
                rounds += 1;
                last = session.last_entry().cloned();
            }
            drop(session);

            if tx.send(result).await.is_err() {
                debug!(identity, "Task receiver dropped, stopping");
                return;
            }
            match end {
                RoundEnd::Acted => {}
                RoundEnd::ActionFailed if revisions < MAX_PLAN_REVISIONS => {
                    revisions += 1;
                    setback = last.as_ref().and_then(failure_feedback);
                    debug!(identity, revisions, "Action failed, revising the plan");
                }
                _ => {
                    debug!(identity, ?end, rounds, "Task finished");
                    return;
                }
            }
        }
    }

    /// Outline the task, or revise `previous` given `feedback`.
    ///
    /// Planning trouble never stops a task: a first plan falls back to
    /// pursuing the goal directly and a failed revision keeps the old plan.
    async fn plan_task(
        &self,
        identity: &str,
        goal: &str,
        previous: Option<&TaskPlan>,
        feedback: Option<&str>,
    ) -> TaskPlan {
        let revision = previous
            .zip(feedback)
            .map(|(previous, feedback)| PlanRevision { previous, feedback });
        let budget = self.timeouts.decision();
        let planned = match tokio::time::timeout(budget, self.decider.plan(goal, revision)).await {
            Ok(planned) => planned,
            Err(_) => Err(DecisionError::Timeout {
                timeout_ms: millis(budget),
            }),
        };

        match planned {
            Ok(plan) => {
                info!(
                    identity,
                    steps = plan.steps.len(),
                    estimated_steps = plan.estimated_steps,
                    revised = revision.is_some(),
                    "Task planned"
                );
                plan
            }
            Err(e) => {
                warn!(identity, decider = self.decider.name(), error = %e, "Planning failed");
                previous.cloned().unwrap_or_default()
            }
        }
    }

    // ── Gate ────────────────────────────────────────────────────────────

    /// Enter the gate of the identity's session, creating it if needed.
    async fn acquire(&self, identity: &str) -> Result<SessionLease, UsageError> {
        loop {
            let shared = self.store.get_or_create(identity).await?;
            let session = self.enter_gate(shared).await?;
            if !session.is_retired() {
                return Ok(session);
            }
            debug!(identity, "Session was dropped while waiting, resolving again");
        }
    }

    /// Enter the gate of an existing session; `None` if there is none.
    async fn acquire_existing(
        &self,
        identity: &str,
    ) -> Result<Option<SessionLease>, UsageError> {
        loop {
            let Some(shared) = self.store.get(identity).await else {
                return Ok(None);
            };
            let session = self.enter_gate(shared).await?;
            if !session.is_retired() {
                return Ok(Some(session));
            }
        }
    }

    async fn enter_gate(&self, shared: SharedSession) -> Result<SessionLease, UsageError> {
        let guard = match self.on_busy {
            BusyPolicy::Queue => shared.lock_owned().await,
            BusyPolicy::Reject => shared.try_lock_owned().map_err(|_| UsageError::Busy)?,
        };
        Ok(SessionLease::new(guard))
    }

    // ── Browse ──────────────────────────────────────────────────────────

    async fn browse(&self, session: &mut Session, raw_url: &str) -> TurnResult {
        let started = Instant::now();
        let identity = session.identity().to_string();
        session.reset_turn_counter();
        session.transition(SessionState::Navigating);

        let opened = self.open_page(session, raw_url).await;
        let success = opened.is_ok();
        let result = match opened {
            Ok((page, screenshot)) => {
                session.transition(SessionState::Idle);
                info!(identity, url = %page.url, "Page opened");
                TurnResult::ok(format!("Opened {}", page_label(&page))).with_screenshot(screenshot)
            }
            Err(e) => {
                warn!(identity, url = raw_url, error = %e, "Navigation failed");
                session.transition(SessionState::Failed);
                session.transition(SessionState::Idle);
                TurnResult::failed(format!(
                    "Could not open {raw_url}: {e}. Send /browse with another address to try again."
                ))
            }
        };

        self.publish_round(&identity, "navigate", success, started);
        result
    }

    async fn open_page(
        &self,
        session: &mut Session,
        raw_url: &str,
    ) -> Result<(PageState, Vec<u8>), CapabilityError> {
        let url = normalize_url(raw_url)?;
        self.ensure_browser(session).await?;

        let page = {
            let browser = session.browser().ok_or(CapabilityError::Closed)?;
            timed(self.timeouts.navigation(), "navigation", browser.navigate(&url)).await?
        };
        session.set_page(page.clone());

        let screenshot = self.screenshot(session).await?;
        Ok((page, screenshot))
    }

    async fn ensure_browser(&self, session: &mut Session) -> Result<(), CapabilityError> {
        if session.has_browser() {
            return Ok(());
        }
        debug!(
            identity = %session.identity(),
            launcher = self.launcher.name(),
            "Launching browser context"
        );
        let browser = timed(self.timeouts.navigation(), "browser launch", self.launcher.launch()).await?;
        session.attach_browser(browser);
        Ok(())
    }

    // ── Instruct ────────────────────────────────────────────────────────

    async fn instruct_round(&self, session: &mut Session, instruction: &str) -> (TurnResult, RoundEnd) {
        if !session.has_live_page() {
            debug!(identity = %session.identity(), "Instruction without an open page");
            return (no_page_result(), RoundEnd::Stalled);
        }

        let started = Instant::now();
        let identity = session.identity().to_string();
        session.transition(SessionState::AwaitingDecision);

        let screenshot = match self.screenshot(session).await {
            Ok(screenshot) => screenshot,
            Err(e) => {
                warn!(identity, error = %e, "Could not capture page before deciding");
                session.transition(SessionState::Failed);
                session.transition(SessionState::Idle);
                self.publish_round(&identity, "screenshot", false, started);
                return (
                    TurnResult::failed(format!(
                        "Could not capture the page: {e}. Try again, or /browse to reload it."
                    )),
                    RoundEnd::Stalled,
                );
            }
        };

        let intent = self
            .decide(&screenshot, instruction, &session.history_tail())
            .await;
        debug!(identity, intent = %intent.kind, rationale = %intent.rationale, "Decision");

        match &intent.kind {
            IntentKind::Unrecognized { reason } => {
                session.transition(SessionState::Idle);
                info!(identity, reason = %reason, "Instruction not understood");
                (
                    TurnResult::needs_more_input(format!(
                        "I couldn't turn that into a browser action ({reason}). \
                         Try rephrasing, e.g. \"click the search box\"."
                    )),
                    RoundEnd::Stalled,
                )
            }
            IntentKind::Done => {
                session.transition(SessionState::Idle);
                session.reset_turn_counter();
                self.publish_round(&identity, "done", true, started);
                let message = if intent.rationale.trim().is_empty() {
                    "Task complete.".to_string()
                } else {
                    intent.rationale.clone()
                };
                (TurnResult::ok(message), RoundEnd::Finished)
            }
            IntentKind::Answer { text } => {
                session.transition(SessionState::Idle);
                session.reset_turn_counter();
                self.publish_round(&identity, "answer", true, started);
                (TurnResult::ok(text.clone()), RoundEnd::Finished)
            }
            _ => self.act(session, instruction, intent, started).await,
        }
    }

    async fn act(
        &self,
        session: &mut Session,
        instruction: &str,
        intent: ActionIntent,
        started: Instant,
    ) -> (TurnResult, RoundEnd) {
        let identity = session.identity().to_string();
        let name = intent.kind.name();

        session.transition(SessionState::ExecutingAction);
        let executed = self.execute(session, &intent.kind).await;
        session.count_round();

        match executed {
            Ok(()) => {
                let description = describe(&intent);
                session.record(HistoryEntry {
                    instruction: instruction.to_string(),
                    intent,
                    outcome: Outcome::Success,
                });
                let screenshot = self.screenshot(session).await;
                session.transition(SessionState::Idle);
                self.publish_round(&identity, name, true, started);

                let result = match screenshot {
                    Ok(screenshot) => TurnResult::ok(description).with_screenshot(screenshot),
                    Err(e) => {
                        warn!(identity, error = %e, "Action ran but the page could not be captured");
                        TurnResult::ok(format!("{description} (screenshot unavailable: {e})"))
                    }
                };
                (result, RoundEnd::Acted)
            }
            Err(e) => {
                warn!(identity, action = name, error = %e, "Action failed");
                let message = format!(
                    "Could not {}: {e}. The page is still open, send another instruction to continue.",
                    intent.kind
                );
                session.record(HistoryEntry {
                    instruction: instruction.to_string(),
                    intent,
                    outcome: Outcome::Failure {
                        error: e.to_string(),
                    },
                });
                session.transition(SessionState::Idle);
                self.publish_round(&identity, name, false, started);
                (TurnResult::failed(message), RoundEnd::ActionFailed)
            }
        }
    }

    async fn execute(&self, session: &mut Session, kind: &IntentKind) -> Result<(), CapabilityError> {
        let browser = session.browser().ok_or(CapabilityError::Closed)?;
        let budget = self.timeouts.action();

        match kind {
            IntentKind::Navigate { url } => {
                let url = normalize_url(url)?;
                let page = timed(self.timeouts.navigation(), "navigation", browser.navigate(&url)).await?;
                session.set_page(page);
                Ok(())
            }
            IntentKind::Click { x, y } => timed(budget, "click", browser.click(*x, *y)).await,
            IntentKind::Type { text } => timed(budget, "typing", browser.type_text(text)).await,
            IntentKind::Scroll { dy } => timed(budget, "scroll", browser.scroll(*dy)).await,
            IntentKind::PressKey { key } => timed(budget, "key press", browser.press_key(key)).await,
            IntentKind::Wait { ms } => {
                timed(budget + Duration::from_millis(*ms), "wait", browser.wait(*ms)).await
            }
            IntentKind::Answer { .. } | IntentKind::Done | IntentKind::Unrecognized { .. } => {
                Err(CapabilityError::InvalidTarget(format!(
                    "'{}' is not a browser action",
                    kind.name()
                )))
            }
        }
    }

    async fn screenshot(&self, session: &Session) -> Result<Vec<u8>, CapabilityError> {
        let browser = session.browser().ok_or(CapabilityError::Closed)?;
        timed(self.timeouts.screenshot(), "screenshot", browser.screenshot()).await
    }

    /// Ask the model; failures and timeouts become unrecognized intents.
    async fn decide(&self, screenshot: &[u8], instruction: &str, history: &[HistoryEntry]) -> ActionIntent {
        let budget = self.timeouts.decision();
        let decided = match tokio::time::timeout(
            budget,
            self.decider.decide(screenshot, instruction, history),
        )
        .await
        {
            Ok(decided) => decided,
            Err(_) => Err(DecisionError::Timeout {
                timeout_ms: millis(budget),
            }),
        };

        decided.unwrap_or_else(|e| {
            warn!(decider = self.decider.name(), error = %e, "Decision failed");
            self.event_bus.publish(DomainEvent::ErrorOccurred {
                context: "decision".into(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
            ActionIntent::unrecognized(e.to_string())
        })
    }

    // ── Image generation ────────────────────────────────────────────────

    async fn generate_image(&self, identity: &str, prompt: &str) -> TurnResult {
        let Some(generator) = &self.generator else {
            return TurnResult::unsupported(
                "Image generation is not configured. Set an [image] model and API key to enable it.",
            );
        };
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return TurnResult::needs_more_input(
                "Tell me what to draw, e.g. \"generate image of a lighthouse at dusk\".",
            );
        }

        // Image requests never create a session, but an existing one is
        // marked busy for the duration and restored afterwards.
        let mut session = match self.acquire_existing(identity).await {
            Ok(session) => session,
            Err(e) => return usage_result(&e),
        };
        let previous = session.as_ref().map(|s| s.state());
        if let Some(s) = session.as_mut() {
            s.transition(SessionState::GeneratingImage);
        }

        let started = Instant::now();
        let budget = self.timeouts.image_generation();
        let generated = match tokio::time::timeout(budget, generator.generate(prompt)).await {
            Ok(generated) => generated,
            Err(_) => Err(GenerationError::Timeout {
                timeout_ms: millis(budget),
            }),
        };

        if let (Some(s), Some(previous)) = (session.as_mut(), previous) {
            s.transition(previous);
        }
        drop(session);

        self.event_bus.publish(DomainEvent::ImageGenerated {
            identity: identity.to_string(),
            success: generated.is_ok(),
            duration_ms: millis(started.elapsed()),
            timestamp: Utc::now(),
        });

        match generated {
            Ok(image) => {
                info!(
                    identity,
                    generator = generator.name(),
                    bytes = image.bytes.len(),
                    mime = %image.mime_type,
                    "Image generated"
                );
                TurnResult::ok(format!("Here is your image of \"{prompt}\".")).with_image(image.bytes)
            }
            Err(e) => {
                warn!(identity, generator = generator.name(), error = %e, "Image generation failed");
                TurnResult::failed(format!(
                    "Image generation failed: {e}. Try again or rephrase the prompt."
                ))
            }
        }
    }

    fn publish_round(&self, identity: &str, intent: &str, success: bool, started: Instant) {
        self.event_bus.publish(DomainEvent::RoundCompleted {
            identity: identity.to_string(),
            intent: intent.to_string(),
            success,
            duration_ms: millis(started.elapsed()),
            timestamp: Utc::now(),
        });
    }
}

/// Bound a capability call by `budget`.
async fn timed<T>(
    budget: Duration,
    operation: &str,
    call: impl Future<Output = Result<T, CapabilityError>>,
) -> Result<T, CapabilityError> {
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result,
        Err(_) => Err(CapabilityError::Timeout {
            operation: operation.to_string(),
            timeout_ms: millis(budget),
        }),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn page_label(page: &PageState) -> String {
    if page.title.trim().is_empty() {
        page.url.clone()
    } else {
        format!("{} ({})", page.title.trim(), page.url)
    }
}

fn describe(intent: &ActionIntent) -> String {
    let rationale = intent.rationale.trim();
    if rationale.is_empty() {
        format!("Did: {}", intent.kind)
    } else {
        format!("Did: {} ({rationale})", intent.kind)
    }
}

/// The instruction for one round of a task.
fn task_instruction(goal: &str, plan: Option<&TaskPlan>, last: Option<&HistoryEntry>) -> String {
    let mut instruction = format!("Goal: {goal}");
    let outline = plan.map(TaskPlan::outline).unwrap_or_default();
    if !outline.is_empty() {
        instruction.push_str(&format!("\nPlan:\n{outline}"));
    }
    if let Some(last) = last {
        match &last.outcome {
            Outcome::Success => instruction.push_str(&format!("\nPrevious step: {}", last.intent.kind)),
            Outcome::Failure { error } => instruction.push_str(&format!(
                "\nPrevious step: {} (failed: {error})",
                last.intent.kind
            )),
        }
    }
    instruction.push_str(
        "\nTake the next single step toward the goal, or answer with done when it is reached.",
    );
    instruction
}

/// What to tell the planner about a failed step.
fn failure_feedback(entry: &HistoryEntry) -> Option<String> {
    match &entry.outcome {
        Outcome::Failure { error } => Some(format!("{} failed: {error}", entry.intent.kind)),
        Outcome::Success => None,
    }
}

fn no_page_result() -> TurnResult {
    TurnResult::unsupported(format!("{}. Send /browse <url> first.", UsageError::NoActivePage))
}

fn usage_result(e: &UsageError) -> TurnResult {
    match e {
        UsageError::Busy => TurnResult::needs_more_input(format!(
            "{e}. Wait for it to finish, then send your message again."
        )),
        UsageError::NoActivePage => no_page_result(),
        UsageError::CapacityReached { .. } => {
            TurnResult::unsupported(format!("{e}. Try again in a moment."))
        }
    }
}
