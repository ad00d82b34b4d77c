//! Timer scheduler driven by simulated time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::sim_clock::SimClock;
use crate::pulse::{Scheduler, TimerCallback, TimerHandle};

/// [`Scheduler`] whose timers fire only when the test advances time.
///
/// Deadlines are on the shared [`SimClock`] timeline. Firing a timer moves
/// the clock to its deadline first, so callbacks observe exactly the
/// instant they were due.
pub struct ManualScheduler {
    clock: SimClock,
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<(u64, u64), TimerCallback>>,
}

impl ManualScheduler {
    /// Schedule against `clock`.
    #[must_use]
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Deadline of the earliest pending timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.lock().keys().next().map(|&(due, _)| due)
    }

    /// Deadlines of all pending timers, earliest first.
    #[must_use]
    pub fn deadlines(&self) -> Vec<u64> {
        self.pending.lock().keys().map(|&(due, _)| due).collect()
    }

    /// Fire the earliest pending timer. Returns its deadline.
    pub fn fire_next(&self) -> Option<u64> {
        let ((due, _), callback) = self.pending.lock().pop_first()?;
        self.clock.set(due);
        callback();
        Some(due)
    }

    /// Fire every timer due at or before `until_us` (including timers armed
    /// by those callbacks), then move the clock to `until_us`. Returns the
    /// number fired.
    pub fn run_until(&self, until_us: u64) -> usize {
        let mut fired = 0;
        loop {
            let next = {
                let mut pending = self.pending.lock();
                let due = pending.keys().next().map(|&(due, _)| due);
                if due.is_some_and(|due| due <= until_us) {
                    pending.pop_first()
                } else {
                    None
                }
            };
            let Some(((due, _), callback)) = next else {
                break;
            };
            self.clock.set(due);
            callback();
            fired += 1;
        }
        self.clock.set(until_us);
        fired
    }

    /// Advance the clock by `us`, firing timers along the way.
    pub fn advance(&self, us: u64) -> usize {
        self.run_until(self.clock.now() + us)
    }

    /// Number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay_us: u64, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let due = self.clock.now() + delay_us;
        self.pending.lock().insert((due, id), callback);
        TimerHandle::from_raw(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        self.pending.lock().retain(|&(_, id), _| id != handle.raw());
    }

    fn is_armed(&self, handle: TimerHandle) -> bool {
        self.pending
            .lock()
            .keys()
            .any(|&(_, id)| id == handle.raw())
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.clock.now())
            .field("pending", &self.deadlines())
            .finish_non_exhaustive()
    }
}
