//! Digital output pins.

use std::sync::atomic::{AtomicBool, Ordering};

/// Logic level of an output pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Driven low.
    Off,
    /// Driven high.
    On,
}

impl From<bool> for Level {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

/// Pin driver. Called from timer callbacks, so it must not block.
pub trait DigitalOutput: Send + Sync {
    /// Drive `pin` to `level`.
    fn set_level(&self, pin: u8, level: Level);
}

/// Output that only latches levels in memory.
///
/// Useful on hosts with no GPIO, or to observe what a pulse train did.
#[derive(Debug)]
pub struct LatchedOutput {
    levels: [AtomicBool; 256],
}

impl LatchedOutput {
    /// All pins start `Off`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            levels: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    /// Last level driven on `pin`.
    #[must_use]
    pub fn level(&self, pin: u8) -> Level {
        self.levels[usize::from(pin)].load(Ordering::Acquire).into()
    }
}

impl Default for LatchedOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalOutput for LatchedOutput {
    fn set_level(&self, pin: u8, level: Level) {
        self.levels[usize::from(pin)].store(level == Level::On, Ordering::Release);
    }
}
