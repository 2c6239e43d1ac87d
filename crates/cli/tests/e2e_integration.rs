//! End-to-end tests: raw chat text through the dispatcher and the agent
//! loop, with a scripted browser and vision model.

use std::sync::Arc;
use std::time::Duration;

use browserclaw_agent::test_support::{
    self, BrowserScript, CannedGenerator, MOCK_SCREENSHOT, MockLauncher, ScriptedDecider, intent,
};
use browserclaw_agent::AgentLoop;
use browserclaw_channels::{Command, classify};
use browserclaw_core::error::DecisionError;
use browserclaw_core::intent::{ActionIntent, IntentKind};
use browserclaw_core::turn::{TurnResult, TurnStatus};

/// Run one chat message the way the bot runtime does.
async fn say(agent: &Arc<AgentLoop>, identity: &str, text: &str) -> Vec<TurnResult> {
    match classify(text) {
        Command::Classified(classification) => vec![agent.handle(identity, classification).await],
        Command::Task { goal } => {
            let mut rx = agent.run_task(identity, &goal);
            let mut results = Vec::new();
            while let Some(result) = rx.recv().await {
                results.push(result);
            }
            results
        }
        Command::Reset => vec![agent.reset(identity).await],
        other => panic!("unexpected command for {text:?}: {other:?}"),
    }
}

fn setup(decider: ScriptedDecider) -> (Arc<AgentLoop>, Arc<MockLauncher>, Arc<ScriptedDecider>) {
    let launcher = Arc::new(MockLauncher::new());
    let decider = Arc::new(decider);
    let agent = test_support::agent(Arc::clone(&launcher), Arc::clone(&decider))
        .with_image_generator(Arc::new(CannedGenerator::new(b"png".to_vec())));
    (Arc::new(agent), launcher, decider)
}

#[tokio::test]
async fn e2e_search_flow() {
    let (agent, launcher, decider) = setup(ScriptedDecider::intents(vec![
        ActionIntent::new(
            IntentKind::Navigate {
                url: "https://duckduckgo.com/".into(),
            },
            "search engine",
        ),
        ActionIntent::new(IntentKind::Click { x: 640, y: 300 }, "search box"),
        ActionIntent::new(
            IntentKind::Type {
                text: "rust async".into(),
            },
            "query",
        ),
        ActionIntent::new(IntentKind::PressKey { key: "Enter".into() }, "submit"),
    ]));

    let opened = say(&agent, "telegram:1", "/browse example.com").await;
    assert!(opened[0].is_ok());

    for text in [
        "search for rust async",
        "click the search box",
        "type rust async",
        "press enter",
    ] {
        let result = say(&agent, "telegram:1", text).await;
        assert!(result[0].is_ok(), "{text}: {}", result[0].message);
        assert_eq!(result[0].screenshot.as_deref(), Some(MOCK_SCREENSHOT));
    }

    assert_eq!(
        launcher.actions(),
        vec![
            "navigate https://example.com/",
            "navigate https://duckduckgo.com/",
            "click 640,300",
            "type rust async",
            "key Enter",
        ]
    );

    // Each decision sees the steps before it.
    let calls = decider.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].history_len, 0);
    assert_eq!(calls[3].history_len, 3);
}

#[tokio::test]
async fn e2e_task_runs_to_answer() {
    let (agent, _launcher, decider) = setup(ScriptedDecider::intents(vec![
        intent(IntentKind::Scroll { dy: 500 }),
        intent(IntentKind::Answer {
            text: "The top story is about Rust 2024.".into(),
        }),
    ]));

    say(&agent, "telegram:1", "/browse news.ycombinator.com").await;
    let results = say(&agent, "telegram:1", "/task what is the top story?").await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[1].status, TurnStatus::Ok);
    assert_eq!(results[1].message, "The top story is about Rust 2024.");
    assert_eq!(decider.call_count(), 2);
}

#[tokio::test]
async fn e2e_image_and_browsing_are_independent() {
    let (agent, launcher, decider) = setup(ScriptedDecider::intents(vec![intent(IntentKind::Click { x: 1, y: 2 })]));

    let image = say(&agent, "telegram:1", "Generate image of a lighthouse").await;
    assert!(image[0].is_ok());
    assert_eq!(image[0].image.as_deref(), Some(b"png".as_slice()));
    assert_eq!(launcher.launches(), 0);

    say(&agent, "telegram:1", "/browse example.com").await;
    let image = say(&agent, "telegram:1", "/image a red fox").await;
    assert!(image[0].is_ok());
    assert!(image[0].screenshot.is_none());

    // The page and its history are untouched by the image request.
    let click = say(&agent, "telegram:1", "click it").await;
    assert!(click[0].is_ok());
    assert_eq!(decider.calls()[0].history_len, 0);
}

#[tokio::test]
async fn e2e_recovers_after_model_outage() {
    let (agent, launcher, _decider) = setup(ScriptedDecider::new(vec![
        Err(DecisionError::Network("connection reset".into())),
        Ok(intent(IntentKind::Click { x: 5, y: 5 })),
    ]));

    say(&agent, "telegram:1", "/browse example.com").await;
    let failed = say(&agent, "telegram:1", "click login").await;
    assert_eq!(failed[0].status, TurnStatus::NeedsMoreInput);

    let retried = say(&agent, "telegram:1", "click login").await;
    assert!(retried[0].is_ok());
    assert_eq!(launcher.actions().last().map(String::as_str), Some("click 5,5"));
}

#[tokio::test]
async fn e2e_conversations_do_not_share_browsers() {
    let (agent, launcher, _decider) = setup(ScriptedDecider::repeating(intent(IntentKind::Scroll { dy: 500 })));

    say(&agent, "telegram:1", "/browse example.com").await;
    say(&agent, "telegram:2", "/browse example.org").await;
    say(&agent, "cli:local", "scroll down").await;

    assert_eq!(launcher.launches(), 2);
    assert_eq!(agent.store().identities().await, vec!["telegram:1", "telegram:2"]);

    let reset = say(&agent, "telegram:1", "/reset").await;
    assert!(reset[0].message.starts_with("Session reset"));
    assert_eq!(launcher.closes(), 1);
    assert_eq!(agent.store().len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn e2e_hung_page_is_reported_and_usable() {
    let launcher = Arc::new(MockLauncher::with_script(BrowserScript {
        action_delay: Some(Duration::from_secs(600)),
        ..Default::default()
    }));
    let decider = Arc::new(ScriptedDecider::intents(vec![
        intent(IntentKind::Click { x: 1, y: 1 }),
        intent(IntentKind::Answer { text: "still here".into() }),
    ]));
    let agent = Arc::new(test_support::agent(Arc::clone(&launcher), decider));

    say(&agent, "telegram:1", "/browse example.com").await;
    let hung = say(&agent, "telegram:1", "click the button").await;
    assert_eq!(hung[0].status, TurnStatus::Failed);
    assert!(hung[0].message.contains("timed out"));

    let next = say(&agent, "telegram:1", "what does the page say?").await;
    assert_eq!(next[0].message, "still here");
}
