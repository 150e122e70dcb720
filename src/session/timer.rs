//! One-shot deadlines on the tokio clock

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Schedules callbacks after a delay
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerService;

impl TimerService {
    pub fn new() -> Self {
        Self
    }

    /// Run `callback` once after `after`, unless cancelled first
    pub fn schedule<F>(&self, after: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(ARMED));
        let task_state = state.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                callback();
            }
        });

        TimerHandle {
            state,
            task: task.abort_handle(),
        }
    }
}

/// Handle to a scheduled callback
///
/// Firing and cancellation race on one atomic, so exactly one of them wins.
#[derive(Debug)]
pub struct TimerHandle {
    state: Arc<AtomicU8>,
    task: AbortHandle,
}

impl TimerHandle {
    /// Prevent the callback from running; false if it already fired
    pub fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.task.abort();
        }
        won
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    #[cfg(test)]
    pub(crate) fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();
        let handle = TimerService::new().schedule(Duration::from_secs(3), move || {
            let _ = tx.send(Instant::now());
        });

        let fired_at = rx.recv().await.expect("timer never fired");
        assert_eq!(fired_at - start, Duration::from_secs(3));
        assert!(handle.has_fired());
        assert!(!handle.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let handle = TimerService::new().schedule(Duration::from_secs(1), move || {
            let _ = tx.send(());
        });

        assert!(handle.is_armed());
        assert!(handle.cancel());
        assert!(!handle.cancel());

        tokio::time::sleep(Duration::from_secs(5)).await;
        // The aborted task dropped the sender without calling back
        assert!(rx.recv().await.is_none());
        assert!(!handle.has_fired());
    }
}
