//! Session store: identity → session, with one gate per session.
//!
//! The map itself sits behind an `RwLock` that is only write-locked to
//! insert or remove entries. Each session sits behind its own `Mutex`,
//! which is the per-session gate: whoever holds the guard drives the
//! session, and rounds for different identities never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use browserclaw_core::error::UsageError;
use browserclaw_core::event::{DomainEvent, EventBus};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::session::{Session, SessionSnapshot};

/// A session behind its gate.
pub type SharedSession = Arc<Mutex<Session>>;

struct Slot {
    session: SharedSession,
    last_used: AtomicU64,
}

/// Mapping from conversation identity to session.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Slot>>>,
    history_limit: usize,
    /// 0 means unbounded
    max_sessions: usize,
    /// Logical clock for least-recently-used ordering
    clock: AtomicU64,
    event_bus: Arc<EventBus>,
}

impl SessionStore {
    pub fn new(history_limit: usize, max_sessions: usize, event_bus: Arc<EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_limit,
            max_sessions,
            clock: AtomicU64::new(0),
            event_bus,
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn touch(&self, slot: &Slot) {
        slot.last_used.store(self.tick(), Ordering::Relaxed);
    }

    /// Look up an existing session.
    pub async fn get(&self, identity: &str) -> Option<SharedSession> {
        let sessions = self.sessions.read().await;
        sessions.get(identity).map(|slot| {
            self.touch(slot);
            Arc::clone(&slot.session)
        })
    }

    /// Return the session for `identity`, creating an idle one if absent.
    ///
    /// Exactly one session is ever created per identity, even when several
    /// callers race. When the store is at capacity, the least recently used
    /// session that is not mid-round is evicted and its browser released;
    /// if every session is busy, creation fails with
    /// [`UsageError::CapacityReached`].
    pub async fn get_or_create(&self, identity: &str) -> Result<SharedSession, UsageError> {
        if let Some(session) = self.get(identity).await {
            return Ok(session);
        }

        let mut sessions = self.sessions.write().await;

        // Another caller may have won the race between the two locks.
        if let Some(slot) = sessions.get(identity) {
            self.touch(slot);
            return Ok(Arc::clone(&slot.session));
        }

        let mut evicted: Option<OwnedMutexGuard<Session>> = None;
        if self.max_sessions > 0 && sessions.len() >= self.max_sessions {
            let mut candidates: Vec<(u64, String, SharedSession)> = sessions
                .iter()
                .map(|(id, slot)| {
                    (
                        slot.last_used.load(Ordering::Relaxed),
                        id.clone(),
                        Arc::clone(&slot.session),
                    )
                })
                .collect();
            candidates.sort_by_key(|(used, _, _)| *used);

            let victim = candidates
                .into_iter()
                .find_map(|(_, id, session)| session.try_lock_owned().ok().map(|g| (id, g)));

            match victim {
                Some((id, mut guard)) => {
                    sessions.remove(&id);
                    guard.retire();
                    evicted = Some(guard);
                }
                None => {
                    warn!(limit = self.max_sessions, identity, "Session capacity reached, all sessions busy");
                    return Err(UsageError::CapacityReached {
                        limit: self.max_sessions,
                    });
                }
            }
        }

        let session = Arc::new(Mutex::new(Session::new(identity, self.history_limit)));
        let slot = Arc::new(Slot {
            session: Arc::clone(&session),
            last_used: AtomicU64::new(self.tick()),
        });
        sessions.insert(identity.to_string(), slot);
        let count = sessions.len();
        drop(sessions);

        if let Some(mut guard) = evicted {
            let victim = guard.identity().to_string();
            warn!(evicted = %victim, for_identity = identity, "Evicting least recently used session");
            guard.release_browser().await;
            self.event_bus.publish(DomainEvent::SessionReset {
                identity: victim,
                reason: "evicted".into(),
                timestamp: Utc::now(),
            });
        }

        info!(identity, sessions = count, "Session created");
        self.event_bus.publish(DomainEvent::SessionCreated {
            identity: identity.to_string(),
            timestamp: Utc::now(),
        });

        Ok(session)
    }

    /// Drop the session for `identity` and release its browser.
    ///
    /// Waits for an in-flight round to finish first. Returns whether a
    /// session existed; resetting an unknown identity is a no-op.
    pub async fn reset(&self, identity: &str) -> bool {
        let removed = self.sessions.write().await.remove(identity);
        let Some(slot) = removed else {
            debug!(identity, "Reset requested for unknown session");
            return false;
        };

        let mut session = slot.session.lock().await;
        session.retire();
        session.release_browser().await;
        drop(session);

        info!(identity, "Session reset");
        self.event_bus.publish(DomainEvent::SessionReset {
            identity: identity.to_string(),
            reason: "reset".into(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Release every session. Used at process shutdown.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Arc<Slot>)> = self.sessions.write().await.drain().collect();
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "Releasing all sessions");

        join_all(drained.into_iter().map(|(identity, slot)| async move {
            let mut session = slot.session.lock().await;
            session.retire();
            session.release_browser().await;
            self.event_bus.publish(DomainEvent::SessionReset {
                identity,
                reason: "shutdown".into(),
                timestamp: Utc::now(),
            });
        }))
        .await;
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// All identities with a live session, sorted.
    pub async fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of one session. Waits for an in-flight round.
    pub async fn snapshot(&self, identity: &str) -> Option<SessionSnapshot> {
        let session = {
            let sessions = self.sessions.read().await;
            Arc::clone(&sessions.get(identity)?.session)
        };
        let guard = session.lock().await;
        Some(guard.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn store(max_sessions: usize) -> SessionStore {
        SessionStore::new(5, max_sessions, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn get_or_create_returns_same_session() {
        let store = store(0);
        let a = store.get_or_create("telegram:1").await.unwrap();
        let b = store.get_or_create("telegram:1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);

        let snap = store.snapshot("telegram:1").await.unwrap();
        assert_eq!(snap.state, SessionState::Idle);
        assert_eq!(snap.history_len, 0);
        assert!(!snap.has_browser);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_creators_share_one_session() {
        let store = Arc::new(store(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.get_or_create("cli:local").await.unwrap() })
            })
            .collect();

        let sessions: Vec<SharedSession> = join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn reset_is_idempotent() {
        let store = store(0);
        store.get_or_create("a").await.unwrap();
        assert!(store.reset("a").await);
        assert!(!store.reset("a").await);
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn reset_retires_held_handles() {
        let store = store(0);
        let handle = store.get_or_create("a").await.unwrap();
        store.reset("a").await;
        assert!(handle.lock().await.is_retired());

        let fresh = store.get_or_create("a").await.unwrap();
        assert!(!Arc::ptr_eq(&handle, &fresh));
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let store = store(2);
        store.get_or_create("a").await.unwrap();
        store.get_or_create("b").await.unwrap();
        // Touch "a" so "b" becomes the oldest.
        store.get("a").await.unwrap();

        store.get_or_create("c").await.unwrap();
        assert_eq!(store.identities().await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn capacity_skips_busy_sessions() {
        let store = store(2);
        let a = store.get_or_create("a").await.unwrap();
        store.get_or_create("b").await.unwrap();

        // "a" is oldest but mid-round.
        let _held = a.lock().await;
        store.get_or_create("c").await.unwrap();
        assert_eq!(store.identities().await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn capacity_reached_when_all_busy() {
        let store = store(1);
        let a = store.get_or_create("a").await.unwrap();
        let _held = a.lock().await;

        let err = store.get_or_create("b").await.unwrap_err();
        assert_eq!(err, UsageError::CapacityReached { limit: 1 });
        assert_eq!(store.identities().await, vec!["a"]);
    }

    #[tokio::test]
    async fn shutdown_all_empties_store() {
        let store = store(0);
        store.get_or_create("a").await.unwrap();
        store.get_or_create("b").await.unwrap();
        store.shutdown_all().await;
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn lifecycle_events_are_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let store = SessionStore::new(5, 0, Arc::clone(&bus));

        store.get_or_create("a").await.unwrap();
        store.reset("a").await;

        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            DomainEvent::SessionCreated { identity, .. } if identity == "a"
        ));
        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            DomainEvent::SessionReset { reason, .. } if reason == "reset"
        ));
    }
}
