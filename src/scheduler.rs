//! Injectable timer scheduling for eager cache eviction.
//!
//! | Scheduler | Behaviour |
//! |-----------|-----------|
//! | [`TokioScheduler`] | Spawns a sleeping tokio task per timer; `cancel` aborts it |
//! | [`ManualScheduler`] | Queues timers against a [`ManualClock`]; `run_due` fires them |
//! | [`NoopScheduler`] | Never fires; expiry stays lazy |

use crate::clock::{deadline_ms, Clock, ManualClock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback run when a timer fires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle used to cancel a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`. Returns `None` when the scheduler cannot
    /// arm a timer, in which case callers must rely on lazy expiry.
    fn schedule(&self, delay: Duration, task: TimerTask) -> Option<TimerId>;

    /// Cancel a pending timer. Cancelling a fired or unknown timer is a no-op.
    fn cancel(&self, id: TimerId);

    /// Number of timers armed and not yet fired or cancelled.
    fn pending(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Timers backed by `tokio::time::sleep`.
pub struct TokioScheduler {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Option<TimerId> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no tokio runtime available, eviction timer not armed");
            return None;
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);

        // Hold the map while spawning so the task cannot deregister before it is registered.
        let Ok(mut guard) = self.tasks.lock() else {
            return None;
        };
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Ok(mut t) = tasks.lock() {
                t.remove(&id);
            }
            task();
        });
        guard.insert(id, handle);
        Some(TimerId(id))
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(handle) = tasks.remove(&id.0) {
                handle.abort();
            }
        }
    }

    fn pending(&self) -> usize {
        self.tasks.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn name(&self) -> &'static str {
        "tokio"
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }
}

struct PendingTimer {
    due_ms: u64,
    task: TimerTask,
}

/// Deterministic scheduler driven by a [`ManualClock`].
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    next_id: AtomicU64,
    timers: Mutex<BTreeMap<u64, PendingTimer>>,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(1),
            timers: Mutex::new(BTreeMap::new()),
        }
    }

    /// Fire every timer whose due time has been reached, earliest first.
    /// Returns the number of timers fired.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now_ms();
        let mut due: Vec<(u64, u64, TimerTask)> = {
            let Ok(mut timers) = self.timers.lock() else {
                return 0;
            };
            let ids: Vec<u64> = timers
                .iter()
                .filter(|(_, t)| t.due_ms <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| timers.remove(&id).map(|t| (t.due_ms, id, t.task)))
                .collect()
        };
        due.sort_by_key(|(due_ms, id, _)| (*due_ms, *id));
        let fired = due.len();
        for (_, _, task) in due {
            task();
        }
        fired
    }

    /// Advance the shared clock and fire whatever became due.
    pub fn advance(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.run_due()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> Option<TimerId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let due_ms = deadline_ms(self.clock.now_ms(), delay);
        let mut timers = self.timers.lock().ok()?;
        timers.insert(id, PendingTimer { due_ms, task });
        Some(TimerId(id))
    }

    fn cancel(&self, id: TimerId) {
        if let Ok(mut timers) = self.timers.lock() {
            timers.remove(&id.0);
        }
    }

    fn pending(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn name(&self) -> &'static str {
        "manual"
    }
}

/// Lazy-only expiry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn schedule(&self, _: Duration, _: TimerTask) -> Option<TimerId> {
        None
    }
    fn cancel(&self, _: TimerId) {}
    fn pending(&self) -> usize {
        0
    }
    fn name(&self) -> &'static str {
        "noop"
    }
}
