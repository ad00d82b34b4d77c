//! Local clock sources.

use std::sync::Arc;
use std::time::Instant;

/// Free-running monotonic microsecond counter.
///
/// Each node has its own; they are unrelated until synchronized. Must
/// never go backwards or reset while the engine runs.
pub trait ClockSource: Send + Sync {
    /// Microseconds since the counter started.
    fn now_us(&self) -> u64;
}

impl<T: ClockSource + ?Sized> ClockSource for Arc<T> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// Host clock backed by [`Instant`], counting from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a new counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now_us(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}
