//! One-at-a-time execution of blocking browser calls.
//!
//! A caller that gives up on a call (its timeout fired) only stops waiting:
//! the blocking work it started keeps running on the pool. Every call for a
//! context takes the lane's lock *inside* the blocking closure, so the next
//! call reaches the tab only after the abandoned one has returned.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinError;

#[derive(Debug, Default, Clone)]
pub struct CallLane {
    turn: Arc<Mutex<()>>,
}

impl CallLane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` on the blocking pool once every earlier call has finished.
    pub async fn run<T, F>(&self, f: F) -> Result<T, JoinError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let turn = Arc::clone(&self.turn);
        tokio::task::spawn_blocking(move || {
            let _turn = turn.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn abandoned_call_finishes_before_the_next_starts() {
        let lane = CallLane::new();
        let running = Arc::new(AtomicBool::new(false));

        let busy = Arc::clone(&running);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            lane.run(move || {
                busy.store(true, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(400));
                busy.store(false, Ordering::SeqCst);
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(running.load(Ordering::SeqCst), "abandoned call is still running");

        let observed = Arc::clone(&running);
        let overlapped = lane.run(move || observed.load(Ordering::SeqCst)).await.unwrap();
        assert!(!overlapped, "next call ran alongside the abandoned one");
    }

    #[tokio::test]
    async fn panicking_call_does_not_block_the_lane() {
        let lane = CallLane::new();
        assert!(lane.run(|| -> u32 { panic!("tab crashed") }).await.is_err());
        assert_eq!(lane.run(|| 7).await.unwrap(), 7);
    }
}
