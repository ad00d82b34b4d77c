//! Hand-driven synchronized clock.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::RwLock;

use super::sim_clock::SimClock;
use crate::protocol::sync::{SyncSource, SyncStatusCallback};

/// [`SyncSource`] whose offset and state are set directly by a test.
pub struct ManualSyncSource {
    clock: SimClock,
    offset_us: AtomicI64,
    synchronized: AtomicBool,
    subscribers: RwLock<Vec<SyncStatusCallback>>,
}

impl ManualSyncSource {
    /// Unsynchronized source reading `clock` with zero offset.
    #[must_use]
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            offset_us: AtomicI64::new(0),
            synchronized: AtomicBool::new(false),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Change the offset added to the clock.
    pub fn set_offset(&self, offset_us: i64) {
        self.offset_us.store(offset_us, Ordering::Release);
    }

    /// Change state, notifying subscribers on an edge.
    pub fn set_synchronized(&self, synchronized: bool) {
        if self.synchronized.swap(synchronized, Ordering::AcqRel) == synchronized {
            return;
        }
        let offset = self.offset_us.load(Ordering::Acquire);
        let subscribers = self.subscribers.read().clone();
        for callback in &subscribers {
            callback(synchronized, offset);
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl SyncSource for ManualSyncSource {
    #[allow(clippy::cast_possible_wrap)]
    fn synced_time_us(&self) -> i64 {
        (self.clock.now() as i64).wrapping_add(self.offset_us.load(Ordering::Acquire))
    }

    fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::Acquire)
    }

    fn subscribe_status(&self, callback: SyncStatusCallback) {
        self.subscribers.write().push(callback);
    }
}

impl std::fmt::Debug for ManualSyncSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualSyncSource")
            .field("offset_us", &self.offset_us.load(Ordering::Relaxed))
            .field("synchronized", &self.is_synchronized())
            .finish_non_exhaustive()
    }
}
