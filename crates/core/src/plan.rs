//! Task plans: the outline a multi-round task follows.
//!
//! Before the first round of a task the decider breaks the goal into a few
//! high-level steps and says what finishing looks like. After a failed
//! round the plan is revised with the failure as feedback.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intent::strip_code_fences;

/// An outline of how a goal will be reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlan {
    /// High-level steps in order. Empty when the goal is pursued directly.
    pub steps: Vec<String>,
    /// What the page or the answer has to show for the goal to count as reached.
    pub success_criteria: String,
    /// The model's guess at how many browser actions it will take.
    pub estimated_steps: u32,
}

/// Context for revising a plan after a setback.
#[derive(Debug, Clone, Copy)]
pub struct PlanRevision<'a> {
    pub previous: &'a TaskPlan,
    /// What went wrong, in words the model can act on.
    pub feedback: &'a str,
}

impl TaskPlan {
    /// No outline: the task works toward the goal one round at a time.
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn is_direct(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parse a plan out of model text.
    ///
    /// Accepts the step list as `plan`, `steps` or `updated_plan` and
    /// tolerates a surrounding code fence. Errors name what was missing.
    pub fn from_model_output(raw: &str) -> Result<Self, String> {
        let value: Value = serde_json::from_str(strip_code_fences(raw))
            .map_err(|e| format!("plan is not JSON: {e}"))?;

        let steps: Vec<String> = ["plan", "steps", "updated_plan"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_array))
            .ok_or("plan has no step list")?
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|step| !step.is_empty())
            .map(String::from)
            .collect();
        if steps.is_empty() {
            return Err("plan has no steps".into());
        }

        let success_criteria = value
            .get("success_criteria")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let estimated_steps = value
            .get("estimated_steps")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(steps.len() as u32);

        Ok(Self {
            steps,
            success_criteria,
            estimated_steps,
        })
    }

    /// Numbered steps followed by the success criteria, for prompts.
    pub fn outline(&self) -> String {
        let mut outline = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                outline.push('\n');
            }
            outline.push_str(&format!("{}. {step}", i + 1));
        }
        if !self.success_criteria.is_empty() {
            if !outline.is_empty() {
                outline.push('\n');
            }
            outline.push_str(&format!("Done when: {}", self.success_criteria));
        }
        outline
    }
}
