use crate::domain::ports::{Clock, TimerCallback, TimerHandle};
use crate::error::{CoreError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;

/// Wall-clock time with timers running as tokio tasks.
#[derive(Clone)]
pub struct TokioClock {
    runtime: Handle,
}

impl TokioClock {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Binds to the runtime of the calling context.
    pub fn current() -> Result<Self> {
        let runtime =
            Handle::try_current().map_err(|e| CoreError::IoError(std::io::Error::other(e)))?;
        Ok(Self::new(runtime))
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if !flag.load(Ordering::Acquire) {
                callback();
            }
        });
        TimerHandle::new(cancelled, Some(task.abort_handle()))
    }
}

/// `from + by`, saturating at the latest representable instant.
fn offset(from: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|by| from.checked_add_signed(by))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

struct PendingTimer {
    deadline: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
    callback: TimerCallback,
}

struct ManualState {
    now: DateTime<Utc>,
    timers: Vec<PendingTimer>,
}

/// A clock that only moves when told to. Timers fire from [`ManualClock::advance`],
/// on the calling thread, in deadline order.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                timers: Vec::new(),
            }),
        }
    }

    pub fn advance(&self, by: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.now = offset(state.now, by);
            let now = state.now;
            let (mut due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.timers)
                .into_iter()
                .partition(|timer| timer.deadline <= now);
            state.timers = pending;
            due.sort_by_key(|timer| timer.deadline);
            due
        };

        // Callbacks may schedule new timers, so the lock is released first.
        for timer in due {
            if !timer.cancelled.load(Ordering::Acquire) {
                (timer.callback)();
            }
        }
    }

    /// Timers that are scheduled and not yet fired or cancelled.
    pub fn pending_timers(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|timer| !timer.cancelled.load(Ordering::Acquire))
            .count()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.state.lock();
        let deadline = offset(state.now, delay);
        state.timers.push(PendingTimer {
            deadline,
            cancelled: Arc::clone(&cancelled),
            callback,
        });
        TimerHandle::new(cancelled, None)
    }
}
