//! Simulated time.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::protocol::sync::ClockSource;

/// Shared "true" timeline in microseconds.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Arc<AtomicU64>,
}

impl SimClock {
    /// Timeline starting at `start_us`.
    #[must_use]
    pub fn new(start_us: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_us)),
        }
    }

    /// Current true time.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Move time forward by `us`.
    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    /// Jump to `us`. Never moves backwards.
    pub fn set(&self, us: u64) {
        self.now.fetch_max(us, Ordering::SeqCst);
    }

    /// A node clock reading true time plus `skew_us`.
    #[must_use]
    pub fn node(&self, skew_us: i64) -> NodeClock {
        NodeClock {
            base: self.clone(),
            skew_us,
        }
    }
}

impl ClockSource for SimClock {
    fn now_us(&self) -> u64 {
        self.now()
    }
}

/// One node's free-running clock: the shared timeline offset by a fixed skew.
#[derive(Debug, Clone)]
pub struct NodeClock {
    base: SimClock,
    skew_us: i64,
}

impl NodeClock {
    /// Skew relative to true time.
    #[must_use]
    pub fn skew_us(&self) -> i64 {
        self.skew_us
    }
}

impl ClockSource for NodeClock {
    fn now_us(&self) -> u64 {
        self.base.now().saturating_add_signed(self.skew_us)
    }
}
