//! Wiring between a chat channel and the agent loop.

use std::future::Future;
use std::sync::Arc;

use browserclaw_agent::{AgentLoop, SessionStore};
use browserclaw_browser::ChromeLauncher;
use browserclaw_channels::dispatcher::{self, Command};
use browserclaw_config::AppConfig;
use browserclaw_core::channel::{Channel, ChannelMessage};
use browserclaw_core::event::{DomainEvent, EventBus};
use browserclaw_core::turn::{TurnResult, TurnStatus};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Telegram rejects longer photo captions.
const MAX_CAPTION_CHARS: usize = 1024;

/// Assemble the agent loop described by `config`.
pub fn build_agent(config: &AppConfig) -> Result<(Arc<AgentLoop>, Arc<EventBus>), Box<dyn std::error::Error>> {
    let event_bus = Arc::new(EventBus::default());
    let decider = browserclaw_providers::build_vision(&config.vision, &config.browser)?;
    let launcher = Arc::new(
        ChromeLauncher::new(config.browser.clone()).with_call_timeout(config.timeouts.navigation()),
    );
    let store = Arc::new(SessionStore::new(
        config.agent.history_limit,
        config.agent.max_sessions,
        Arc::clone(&event_bus),
    ));

    let mut agent = AgentLoop::new(store, launcher, decider, Arc::clone(&event_bus))
        .with_timeouts(config.timeouts.clone())
        .with_max_rounds(config.agent.max_rounds)
        .with_busy_policy(config.agent.on_busy);

    match browserclaw_providers::build_image(&config.image) {
        Ok(generator) => agent = agent.with_image_generator(generator),
        Err(e) => warn!(error = %e, "Image generation disabled"),
    }

    Ok((Arc::new(agent), event_bus))
}

/// Log domain events until the bus closes.
pub fn spawn_event_logger(event_bus: &EventBus) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &DomainEvent) {
    match event {
        DomainEvent::SessionCreated { identity, .. } => info!(identity = %identity, "Session created"),
        DomainEvent::SessionReset { identity, reason, .. } => {
            info!(identity = %identity, reason = %reason, "Session closed")
        }
        DomainEvent::RoundCompleted {
            identity,
            intent,
            success,
            duration_ms,
            ..
        } => debug!(identity = %identity, intent = %intent, success, duration_ms, "Round completed"),
        DomainEvent::ImageGenerated {
            identity,
            success,
            duration_ms,
            ..
        } => debug!(identity = %identity, success, duration_ms, "Image generated"),
        DomainEvent::ErrorOccurred {
            context,
            error_message,
            ..
        } => warn!(context = %context, error = %error_message, "Agent error"),
    }
}

/// Relays messages from one channel to the agent loop and renders the
/// results back.
pub struct BotRuntime {
    agent: Arc<AgentLoop>,
    channel: Arc<dyn Channel>,
}

impl BotRuntime {
    pub fn new(agent: Arc<AgentLoop>, channel: Arc<dyn Channel>) -> Self {
        Self { agent, channel }
    }

    /// Serve the channel until it closes or `shutdown` resolves, then
    /// close every browser.
    ///
    /// Each message runs on its own task so one slow conversation never
    /// holds up the others; the session gate orders messages within a
    /// conversation.
    pub async fn run_until(
        self: &Arc<Self>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut rx = self.channel.start().await?;
        info!(channel = self.channel.name(), "Listening for messages");
        tokio::pin!(shutdown);

        let mut in_flight = Vec::new();
        loop {
            tokio::select! {
                incoming = rx.recv() => match incoming {
                    Some(Ok(msg)) => {
                        let runtime = Arc::clone(self);
                        in_flight.retain(|h: &JoinHandle<()>| !h.is_finished());
                        in_flight.push(tokio::spawn(async move { runtime.dispatch(msg).await }));
                    }
                    Some(Err(e)) => warn!(error = %e, "Channel error"),
                    None => {
                        info!("Channel closed");
                        break;
                    }
                },
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }

        self.channel.stop().await?;
        for handle in in_flight {
            handle.abort();
        }
        self.agent.store().shutdown_all().await;
        Ok(())
    }

    /// Handle one incoming message end to end.
    pub async fn dispatch(&self, msg: ChannelMessage) {
        if !self.sender_allowed(&msg) {
            warn!(
                channel = self.channel.name(),
                sender = %msg.sender_id,
                "Ignoring message from unauthorized sender"
            );
            return;
        }

        let identity = msg.session_key();
        let chat_id = msg.chat_id.as_str();
        debug!(identity = %identity, content_len = msg.content.len(), "Incoming message");

        match dispatcher::classify(&msg.content) {
            Command::Start => self.reply(chat_id, dispatcher::WELCOME).await,
            Command::Help => self.reply(chat_id, dispatcher::HELP).await,
            Command::Usage(usage) => self.reply(chat_id, &usage).await,
            Command::Reset => {
                let result = self.agent.reset(&identity).await;
                self.deliver(chat_id, &result).await;
            }
            Command::Task { goal } => {
                self.typing(chat_id).await;
                let mut results = self.agent.run_task(&identity, &goal);
                while let Some(result) = results.recv().await {
                    self.deliver(chat_id, &result).await;
                    self.typing(chat_id).await;
                }
            }
            Command::Classified(classification) => {
                self.typing(chat_id).await;
                let result = self.agent.handle(&identity, classification).await;
                self.deliver(chat_id, &result).await;
            }
        }
    }

    fn sender_allowed(&self, msg: &ChannelMessage) -> bool {
        if self.channel.is_allowed(&msg.sender_id) {
            return true;
        }
        msg.metadata
            .get("username")
            .and_then(|u| u.as_str())
            .is_some_and(|username| self.channel.is_allowed(username))
    }

    async fn typing(&self, chat_id: &str) {
        if let Err(e) = self.channel.send_typing(chat_id).await {
            debug!(error = %e, "Typing indicator failed");
        }
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.channel.send(chat_id, text).await {
            warn!(chat_id, error = %e, "Failed to send reply");
        }
    }

    /// Render a turn result: the picture with the message as caption when
    /// it fits, otherwise text then picture.
    async fn deliver(&self, chat_id: &str, result: &TurnResult) {
        if result.status == TurnStatus::Failed {
            warn!(chat_id, message = %result.message, "Turn failed");
        }

        let Some(picture) = result.image.as_deref().or(result.screenshot.as_deref()) else {
            self.reply(chat_id, &result.message).await;
            return;
        };

        let caption_fits = result.message.chars().count() <= MAX_CAPTION_CHARS;
        if !caption_fits {
            self.reply(chat_id, &result.message).await;
        }
        let caption = caption_fits.then_some(result.message.as_str());
        if let Err(e) = self.channel.send_photo(chat_id, picture, caption).await {
            warn!(chat_id, error = %e, "Failed to send picture");
            if caption_fits {
                self.reply(chat_id, &result.message).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use browserclaw_agent::test_support::{
        self, CannedGenerator, MOCK_SCREENSHOT, MockLauncher, ScriptedDecider, intent,
    };
    use browserclaw_core::channel::ChannelId;
    use browserclaw_core::error::ChannelError;
    use browserclaw_core::intent::IntentKind;
    use std::sync::Mutex;
    use tokio::sync::{mpsc, oneshot};

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Text(String),
        Photo { bytes: Vec<u8>, caption: Option<String> },
        Typing,
    }

    struct RecordingChannel {
        id: ChannelId,
        allowed: Vec<String>,
        sent: Mutex<Vec<Sent>>,
        inbox: Mutex<Option<mpsc::Receiver<Result<ChannelMessage, ChannelError>>>>,
        fail_photos: bool,
        stopped: Mutex<bool>,
    }

    impl RecordingChannel {
        fn new() -> Self {
            Self {
                id: ChannelId("test".into()),
                allowed: vec!["*".into()],
                sent: Mutex::new(Vec::new()),
                inbox: Mutex::new(None),
                fail_photos: false,
                stopped: Mutex::new(false),
            }
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|s| **s != Sent::Typing)
                .cloned()
                .collect()
        }

        fn texts(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter_map(|s| match s {
                    Sent::Text(t) => Some(t),
                    Sent::Photo { caption, .. } => caption,
                    Sent::Typing => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "test"
        }

        fn id(&self) -> &ChannelId {
            &self.id
        }

        async fn start(
            &self,
        ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
            self.inbox
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| ChannelError::NotConfigured("no inbox".into()))
        }

        async fn send(&self, _chat_id: &str, content: &str) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(Sent::Text(content.into()));
            Ok(())
        }

        async fn send_photo(
            &self,
            _chat_id: &str,
            photo: &[u8],
            caption: Option<&str>,
        ) -> Result<(), ChannelError> {
            if self.fail_photos {
                return Err(ChannelError::DeliveryFailed {
                    channel: "test".into(),
                    reason: "photo rejected".into(),
                });
            }
            self.sent.lock().unwrap().push(Sent::Photo {
                bytes: photo.to_vec(),
                caption: caption.map(String::from),
            });
            Ok(())
        }

        async fn send_typing(&self, _chat_id: &str) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(Sent::Typing);
            Ok(())
        }

        fn is_allowed(&self, sender_id: &str) -> bool {
            self.allowed.iter().any(|a| a == "*" || a == sender_id)
        }

        async fn stop(&self) -> Result<(), ChannelError> {
            *self.stopped.lock().unwrap() = true;
            Ok(())
        }
    }

    fn message(sender: &str, text: &str) -> ChannelMessage {
        ChannelMessage {
            channel_id: ChannelId("test".into()),
            sender_id: sender.into(),
            sender_name: None,
            content: text.into(),
            chat_id: "chat-1".into(),
            metadata: serde_json::Map::new(),
        }
    }

    fn runtime(
        decider: ScriptedDecider,
        channel: RecordingChannel,
    ) -> (Arc<BotRuntime>, Arc<MockLauncher>, Arc<RecordingChannel>) {
        let launcher = Arc::new(MockLauncher::new());
        let agent = test_support::agent(Arc::clone(&launcher), Arc::new(decider))
            .with_image_generator(Arc::new(CannedGenerator::new(b"\x89PNG\r\n\x1a\nfox".to_vec())));
        let channel = Arc::new(channel);
        let runtime = Arc::new(BotRuntime::new(Arc::new(agent), channel.clone()));
        (runtime, launcher, channel)
    }

    #[tokio::test]
    async fn start_and_usage_are_answered_without_the_agent() {
        let (rt, launcher, channel) = runtime(ScriptedDecider::intents(vec![]), RecordingChannel::new());
        rt.dispatch(message("1", "/start")).await;
        rt.dispatch(message("1", "/browse")).await;

        let texts = channel.texts();
        assert!(texts[0].contains("/browse <url>"));
        assert!(texts[1].contains("Please provide a URL"));
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn browse_then_instruct_sends_screenshots() {
        let decider = ScriptedDecider::intents(vec![intent(IntentKind::Click { x: 10, y: 20 })]);
        let (rt, launcher, channel) = runtime(decider, RecordingChannel::new());

        rt.dispatch(message("1", "/browse example.com")).await;
        rt.dispatch(message("1", "click the first link")).await;

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        for s in &sent {
            assert!(matches!(s, Sent::Photo { bytes, caption: Some(_) } if bytes == MOCK_SCREENSHOT));
        }
        assert!(channel.texts()[0].starts_with("Opened"));
        assert!(channel.texts()[1].contains("click"));
        assert_eq!(launcher.actions(), vec!["navigate https://example.com/", "click 10,20"]);
    }

    #[tokio::test]
    async fn instruct_without_page_explains() {
        let (rt, _launcher, channel) = runtime(ScriptedDecider::intents(vec![]), RecordingChannel::new());
        rt.dispatch(message("1", "click login")).await;
        assert!(channel.texts()[0].contains("/browse <url>"));
    }

    #[tokio::test]
    async fn generated_image_is_sent_as_photo() {
        let (rt, launcher, channel) = runtime(ScriptedDecider::intents(vec![]), RecordingChannel::new());
        rt.dispatch(message("1", "generate image of a fox")).await;

        match &channel.sent()[0] {
            Sent::Photo { bytes, .. } => assert!(bytes.ends_with(b"fox")),
            other => panic!("expected photo, got {other:?}"),
        }
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn photo_failure_falls_back_to_text() {
        let mut channel = RecordingChannel::new();
        channel.fail_photos = true;
        let (rt, _launcher, channel) = runtime(ScriptedDecider::intents(vec![]), channel);

        rt.dispatch(message("1", "/browse example.com")).await;
        assert!(matches!(&channel.sent()[0], Sent::Text(t) if t.starts_with("Opened")));
    }

    #[tokio::test]
    async fn unauthorized_senders_are_ignored() {
        let mut channel = RecordingChannel::new();
        channel.allowed = vec!["42".into(), "alice".into()];
        let (rt, launcher, channel) = runtime(ScriptedDecider::intents(vec![]), channel);

        rt.dispatch(message("7", "/browse example.com")).await;
        assert!(channel.sent().is_empty());
        assert_eq!(launcher.launches(), 0);

        let mut by_name = message("8", "/start");
        by_name.metadata.insert("username".into(), "alice".into());
        rt.dispatch(by_name).await;
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn task_streams_every_round() {
        let decider = ScriptedDecider::intents(vec![
            intent(IntentKind::Click { x: 1, y: 1 }),
            intent(IntentKind::Scroll { dy: 500 }),
            intent(IntentKind::Done),
        ]);
        let (rt, _launcher, channel) = runtime(decider, RecordingChannel::new());

        rt.dispatch(message("1", "/browse example.com")).await;
        rt.dispatch(message("1", "/task read the article")).await;

        // open + two actions + done
        assert_eq!(channel.sent().len(), 4);
    }

    #[tokio::test]
    async fn reset_closes_the_browser() {
        let (rt, launcher, channel) = runtime(ScriptedDecider::intents(vec![]), RecordingChannel::new());
        rt.dispatch(message("1", "/browse example.com")).await;
        rt.dispatch(message("1", "/reset")).await;

        assert_eq!(launcher.closes(), 1);
        assert!(channel.texts()[1].starts_with("Session reset"));
    }

    #[tokio::test]
    async fn run_until_shutdown_closes_sessions() {
        let channel = RecordingChannel::new();
        let (tx, rx) = mpsc::channel(8);
        *channel.inbox.lock().unwrap() = Some(rx);
        let (rt, launcher, channel) = runtime(ScriptedDecider::intents(vec![]), channel);

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = {
            let rt = Arc::clone(&rt);
            tokio::spawn(async move {
                rt.run_until(async {
                    let _ = stop_rx.await;
                })
                .await
                .map_err(|e| e.to_string())
            })
        };

        tx.send(Ok(message("1", "/browse example.com"))).await.unwrap();
        // Wait for the browse reply before shutting down.
        for _ in 0..100 {
            if !channel.sent().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(channel.sent().len(), 1);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(*channel.stopped.lock().unwrap());
        assert_eq!(launcher.closes(), 1);
        assert!(rt.agent.store().is_empty().await);
    }
}
