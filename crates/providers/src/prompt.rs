//! Prompts for the vision decision model.

use browserclaw_core::decision::HistoryEntry;
use browserclaw_core::plan::PlanRevision;

/// Instructions sent as the system message on every decision.
pub fn system_prompt(viewport_width: u32, viewport_height: u32) -> String {
    format!(
        r#"You operate a web browser by looking at screenshots.
Each turn you get one screenshot of a {viewport_width}x{viewport_height} viewport, the user's instruction, and the steps taken so far.
Answer with exactly one JSON object and nothing else:

{{"action": "<name>", ...fields..., "reasoning": "<one short sentence>"}}

Actions:
- navigate: {{"action": "navigate", "url": "https://..."}}
- click: {{"action": "click", "coordinates": [x, y]}} with pixel coordinates in the screenshot, origin at the top-left corner
- type: {{"action": "type", "text": "..."}} types into the focused field, so click the field first
- key: {{"action": "key", "key": "Enter"}} presses a single key
- scroll: {{"action": "scroll", "direction": "up" or "down"}}
- wait: {{"action": "wait", "ms": 1000}} when the page is still loading
- answer: {{"action": "answer", "text": "..."}} answers the user's question from what the page shows
- done: {{"action": "done"}} when the instruction has been carried out
- unrecognized: {{"action": "unrecognized", "reasoning": "..."}} when the instruction cannot be carried out on this page

Browser rules:
- To search the web, navigate to "https://duckduckgo.com/" and search there. Never use Google, Bing or another search engine.
- If the instruction is a search and the page is not DuckDuckGo, the first action is navigating to "https://duckduckgo.com/".
- After typing a search query, the very next action must be {{"action": "key", "key": "Enter"}} to submit it.
- Only act on what is visible in the screenshot. Scroll to reveal more."#
    )
}

/// The text part of the user message.
pub fn user_prompt(instruction: &str, history: &[HistoryEntry]) -> String {
    let mut prompt = format!("Instruction: {instruction}\n\n");
    if history.is_empty() {
        prompt.push_str("Previous steps: none");
    } else {
        prompt.push_str("Previous steps (oldest first):");
        for (i, entry) in history.iter().enumerate() {
            prompt.push_str(&format!("\n{}. {}", i + 1, entry.summary()));
        }
    }
    prompt
}

/// Text-only request to outline a task, or to revise an outline after a setback.
pub fn planning_prompt(goal: &str, revision: Option<PlanRevision<'_>>) -> String {
    let mut prompt = format!(
        "You plan tasks for an agent that operates a web browser one action at a time.\n\
         USER REQUEST: {goal}\n"
    );
    if let Some(revision) = revision {
        prompt.push_str(&format!(
            "\nCURRENT PLAN:\n{}\n\nFEEDBACK: {}\n\n\
             The agent got stuck following this plan. Adjust the plan to get past the problem.\n",
            revision.previous.outline(),
            revision.feedback
        ));
    } else {
        prompt.push_str(
            "\nBreak the request into a short plan of high-level steps. \
             Which pages need visiting, and what information is needed? \
             Decide what counts as success.\n",
        );
    }
    prompt.push_str(
        r#"
Answer with exactly one JSON object and nothing else:
{"thought": "<short reasoning>", "plan": ["Step 1: ...", "Step 2: ..."], "estimated_steps": 5, "success_criteria": "<what finishing looks like>"}"#,
    );
    prompt
}
