//! Domain event system — decoupled observation of the agent loop.
//!
//! Events are published when sessions come and go and when rounds finish.
//! The CLI subscribes to log them; tests subscribe to assert on them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A session was created for a new conversation identity
    SessionCreated {
        identity: String,
        timestamp: DateTime<Utc>,
    },

    /// A session was torn down and its browser released
    SessionReset {
        identity: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A browse or decide-then-act round finished
    RoundCompleted {
        identity: String,
        intent: String, // "navigate", "click", "done", ...
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The image model produced (or failed to produce) an image
    ImageGenerated {
        identity: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // Ignore send errors (no subscribers = that's fine)
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::RoundCompleted {
            identity: "telegram:1".into(),
            intent: "click".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::RoundCompleted { intent, success, .. } => {
                assert_eq!(intent, "click");
                assert!(success);
            }
            _ => panic!("Expected RoundCompleted event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
