//! Vision decision trait — the abstraction over the screenshot-reading model.
//!
//! A decider looks at a screenshot, the user's instruction, and a short tail
//! of what happened in earlier rounds, and answers with one [`ActionIntent`].
//!
//! Implementations: OpenAI-compatible chat models, Gemini.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::DecisionError;
use crate::intent::ActionIntent;
use crate::plan::{PlanRevision, TaskPlan};

/// How an executed intent turned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { error: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One `(instruction, intent, outcome)` triple in a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub instruction: String,
    pub intent: ActionIntent,
    pub outcome: Outcome,
}

impl HistoryEntry {
    /// One-line rendering for model prompts.
    pub fn summary(&self) -> String {
        match &self.outcome {
            Outcome::Success => format!("\"{}\" -> {} (ok)", self.instruction, self.intent.kind),
            Outcome::Failure { error } => format!(
                "\"{}\" -> {} (failed: {error})",
                self.instruction, self.intent.kind
            ),
        }
    }
}

/// The core vision decision trait.
///
/// Malformed model output must come back as `Ok` with an unrecognized
/// intent; `Err` is reserved for failures to reach or use the model.
#[async_trait]
pub trait VisionDecider: Send + Sync {
    /// A human-readable name (e.g., "openai", "gemini").
    fn name(&self) -> &str;

    /// Decide the next action for `instruction` given the current page.
    async fn decide(
        &self,
        screenshot: &[u8],
        instruction: &str,
        history: &[HistoryEntry],
    ) -> std::result::Result<ActionIntent, DecisionError>;

    /// Outline how a multi-round task will reach `goal`, or revise an
    /// outline after a setback.
    ///
    /// Deciders without a planning prompt pursue the goal directly.
    async fn plan(
        &self,
        goal: &str,
        revision: Option<PlanRevision<'_>>,
    ) -> std::result::Result<TaskPlan, DecisionError> {
        let _ = (goal, revision);
        Ok(TaskPlan::direct())
    }

    /// Health check — can we reach the model?
    async fn health_check(&self) -> std::result::Result<bool, DecisionError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentKind;

    #[test]
    fn history_summary_mentions_failure() {
        let entry = HistoryEntry {
            instruction: "click login".into(),
            intent: ActionIntent::new(IntentKind::Click { x: 1, y: 2 }, ""),
            outcome: Outcome::Failure {
                error: "element detached".into(),
            },
        };
        let summary = entry.summary();
        assert!(summary.contains("click at (1, 2)"));
        assert!(summary.contains("element detached"));
    }
}
