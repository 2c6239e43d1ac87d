//! A browser whose calls occupy a blocking pool thread, the way the Chrome
//! context does, driven past its action budget.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use browserclaw_agent::test_support::{ScriptedDecider, intent};
use browserclaw_agent::{AgentLoop, SessionState, SessionStore};
use browserclaw_browser::CallLane;
use browserclaw_config::TimeoutConfig;
use browserclaw_core::capability::{BrowserCapability, BrowserLauncher, PageState};
use browserclaw_core::classification::Classification;
use browserclaw_core::error::CapabilityError;
use browserclaw_core::event::EventBus;
use browserclaw_core::intent::IntentKind;
use browserclaw_core::turn::TurnStatus;

const ID: &str = "telegram:7";

#[derive(Default)]
struct Tracker {
    busy: AtomicBool,
    overlapped: AtomicBool,
}

struct LaneLauncher {
    tracker: Arc<Tracker>,
    click_cost: Duration,
}

#[async_trait]
impl BrowserLauncher for LaneLauncher {
    fn name(&self) -> &str {
        "lane"
    }

    async fn launch(&self) -> Result<Box<dyn BrowserCapability>, CapabilityError> {
        Ok(Box::new(LaneBrowser {
            lane: CallLane::new(),
            tracker: Arc::clone(&self.tracker),
            click_cost: self.click_cost,
        }))
    }
}

struct LaneBrowser {
    lane: CallLane,
    tracker: Arc<Tracker>,
    click_cost: Duration,
}

impl LaneBrowser {
    /// Hold a pool thread for `cost`, noting whether another call was running.
    async fn blocking(&self, cost: Duration) -> Result<(), CapabilityError> {
        let tracker = Arc::clone(&self.tracker);
        self.lane
            .run(move || {
                if tracker.busy.swap(true, Ordering::SeqCst) {
                    tracker.overlapped.store(true, Ordering::SeqCst);
                }
                std::thread::sleep(cost);
                tracker.busy.store(false, Ordering::SeqCst);
            })
            .await
            .map_err(|e| CapabilityError::Action {
                action: "tab call".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl BrowserCapability for LaneBrowser {
    async fn navigate(&self, url: &str) -> Result<PageState, CapabilityError> {
        self.blocking(Duration::from_millis(5)).await?;
        Ok(PageState {
            url: url.to_string(),
            title: String::new(),
        })
    }

    async fn screenshot(&self) -> Result<Vec<u8>, CapabilityError> {
        self.blocking(Duration::from_millis(5)).await?;
        Ok(b"jpeg".to_vec())
    }

    async fn click(&self, _x: u32, _y: u32) -> Result<(), CapabilityError> {
        self.blocking(self.click_cost).await
    }

    async fn type_text(&self, _text: &str) -> Result<(), CapabilityError> {
        self.blocking(Duration::from_millis(5)).await
    }

    async fn press_key(&self, _key: &str) -> Result<(), CapabilityError> {
        self.blocking(Duration::from_millis(5)).await
    }

    async fn scroll(&self, _dy: i32) -> Result<(), CapabilityError> {
        self.blocking(Duration::from_millis(5)).await
    }
}

#[tokio::test]
async fn overrunning_click_never_overlaps_the_next_round() {
    let tracker = Arc::new(Tracker::default());
    let launcher = Arc::new(LaneLauncher {
        tracker: Arc::clone(&tracker),
        click_cost: Duration::from_millis(800),
    });
    let decider = Arc::new(ScriptedDecider::intents(vec![
        intent(IntentKind::Click { x: 1, y: 1 }),
        intent(IntentKind::Scroll { dy: 500 }),
    ]));
    let bus = Arc::new(EventBus::default());
    let store = Arc::new(SessionStore::new(10, 0, Arc::clone(&bus)));
    let agent = AgentLoop::new(store, launcher, decider, bus).with_timeouts(TimeoutConfig {
        action: 100,
        ..Default::default()
    });

    let opened = agent
        .handle(ID, Classification::Browse {
            url: "https://example.com".into(),
        })
        .await;
    assert_eq!(opened.status, TurnStatus::Ok);

    let clicked = agent
        .handle(ID, Classification::Instruct {
            text: "click the banner".into(),
        })
        .await;
    assert_eq!(clicked.status, TurnStatus::Failed);
    assert!(clicked.message.contains("click timed out after 100ms"), "{}", clicked.message);

    // The click is still holding the tab; this round has to wait for it.
    let scrolled = agent
        .handle(ID, Classification::Instruct {
            text: "scroll down".into(),
        })
        .await;
    assert_eq!(scrolled.status, TurnStatus::Ok, "{}", scrolled.message);
    assert!(!tracker.overlapped.load(Ordering::SeqCst));
    assert_eq!(
        agent.store().snapshot(ID).await.unwrap().state,
        SessionState::Idle
    );
}
