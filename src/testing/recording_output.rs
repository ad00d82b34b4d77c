//! Output that records every level change.

use parking_lot::Mutex;

use super::sim_clock::SimClock;
use crate::pulse::{DigitalOutput, Level};

/// A level change observed by [`RecordingOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Pin driven.
    pub pin: u8,
    /// New level.
    pub level: Level,
    /// True time of the change.
    pub at_us: u64,
}

/// [`DigitalOutput`] that logs `set_level` calls with their simulated time.
#[derive(Debug)]
pub struct RecordingOutput {
    clock: SimClock,
    transitions: Mutex<Vec<Transition>>,
}

impl RecordingOutput {
    /// Timestamp transitions from `clock`.
    #[must_use]
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            transitions: Mutex::new(Vec::new()),
        }
    }

    /// Every recorded call, in order.
    #[must_use]
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.lock().clone()
    }

    /// Times at which `pin` went `On`.
    #[must_use]
    pub fn rising_edges(&self, pin: u8) -> Vec<u64> {
        self.transitions
            .lock()
            .iter()
            .filter(|t| t.pin == pin && t.level == Level::On)
            .map(|t| t.at_us)
            .collect()
    }

    /// Last level driven on `pin` (`Off` if never driven).
    #[must_use]
    pub fn level(&self, pin: u8) -> Level {
        self.transitions
            .lock()
            .iter()
            .rev()
            .find(|t| t.pin == pin)
            .map_or(Level::Off, |t| t.level)
    }

    /// Forget recorded transitions.
    pub fn clear(&self) {
        self.transitions.lock().clear();
    }
}

impl DigitalOutput for RecordingOutput {
    fn set_level(&self, pin: u8, level: Level) {
        self.transitions.lock().push(Transition {
            pin,
            level,
            at_us: self.clock.now(),
        });
    }
}
