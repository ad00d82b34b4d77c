//! One-shot timer service.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::AbortHandle;

/// Body of a timer. Runs in a constrained context: short, non-blocking,
/// no logging. Shared so re-arming does not allocate.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifies one armed timer. Schedulers never hand out id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wrap a scheduler-assigned id.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Scheduler-assigned id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Arms one-shot callbacks after a relative delay.
///
/// A handle is armed from `schedule_once` until its callback starts or it
/// is cancelled.
pub trait Scheduler: Send + Sync {
    /// Run `callback` once, `delay_us` microseconds from now.
    fn schedule_once(&self, delay_us: u64, callback: TimerCallback) -> TimerHandle;

    /// Disarm `handle`. No-op if it already fired.
    fn cancel(&self, handle: TimerHandle);

    /// Whether `handle` is still pending.
    fn is_armed(&self, handle: TimerHandle) -> bool;
}

/// [`Scheduler`] backed by tokio tasks.
#[derive(Debug)]
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    /// Spawn timers on `runtime`.
    #[must_use]
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Spawn timers on the runtime of the calling task.
    ///
    /// # Errors
    /// Returns [`TryCurrentError`] outside a tokio runtime.
    pub fn try_current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }

    /// Number of timers still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay_us: u64, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);

        // Holding the lock across spawn keeps the task from removing its
        // entry before it is inserted.
        let mut guard = self.pending.lock();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(Duration::from_micros(delay_us)).await;
            if pending.lock().remove(&id).is_some() {
                callback();
            }
        });
        guard.insert(id, task.abort_handle());
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(task) = self.pending.lock().remove(&handle.0) {
            task.abort();
        }
    }

    fn is_armed(&self, handle: TimerHandle) -> bool {
        self.pending.lock().contains_key(&handle.0)
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.pending.lock().drain() {
            task.abort();
        }
    }
}
