// src/core/conversation/timer.rs

//! Deadline scheduling for conversations.
//!
//! The correlator never sleeps itself; it asks a `TimerService` to call back
//! when a deadline elapses and cancels the timer when the conversation
//! resolves first.

use crate::core::errors::MessagingError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// A task to run when a deadline elapses.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Cancels a scheduled task when asked. Dropping the handle does NOT cancel.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl TimerHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle for a task that needs no cancellation.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// A monotonic timer facility that fires tasks after a delay.
pub trait TimerService: Send + Sync {
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle;
}

/// Fires deadlines on a Tokio runtime, one sleeping task per deadline.
#[derive(Debug, Clone)]
pub struct TokioTimer {
    handle: Handle,
}

impl TokioTimer {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Binds to the runtime of the calling context.
    pub fn current() -> Result<Self, MessagingError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| MessagingError::Internal(format!("no Tokio runtime available: {e}")))
    }
}

impl TimerService for TokioTimer {
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(after).await;
            task();
        });
        TimerHandle::new(move || join.abort())
    }
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_id: u64,
    scheduled: BTreeMap<(Duration, u64), TimerTask>,
}

/// A timer driven explicitly by `advance`, for deterministic scheduling.
#[derive(Clone, Default)]
pub struct ManualTimer {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward and fires every task now due, in deadline order.
    ///
    /// Tasks run without the clock lock held, so they may schedule or cancel timers.
    pub fn advance(&self, by: Duration) -> usize {
        let target = {
            let mut clock = self.clock.lock();
            clock.now += by;
            clock.now
        };

        let mut fired = 0;
        loop {
            let due = {
                let mut clock = self.clock.lock();
                match clock.scheduled.first_key_value() {
                    Some((&(deadline, _), _)) if deadline <= target => {
                        clock.scheduled.pop_first().map(|(_, task)| task)
                    }
                    _ => None,
                }
            };
            match due {
                Some(task) => {
                    task();
                    fired += 1;
                }
                None => return fired,
            }
        }
    }

    /// Number of tasks still waiting to fire.
    pub fn pending(&self) -> usize {
        self.clock.lock().scheduled.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.lock().now
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, after: Duration, task: TimerTask) -> TimerHandle {
        let key = {
            let mut clock = self.clock.lock();
            let id = clock.next_id;
            clock.next_id += 1;
            let key = (clock.now + after, id);
            clock.scheduled.insert(key, task);
            key
        };
        let clock = Arc::clone(&self.clock);
        TimerHandle::new(move || {
            clock.lock().scheduled.remove(&key);
        })
    }
}

impl std::fmt::Debug for ManualTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clock = self.clock.lock();
        f.debug_struct("ManualTimer")
            .field("now", &clock.now)
            .field("pending", &clock.scheduled.len())
            .finish()
    }
}
