//! Synchronized periodic pulse output.
//!
//! Drives a digital output ON at every multiple of a fixed interval on the
//! synchronized clock and OFF a pulse width later. Nodes sharing the same
//! synchronized time pulse in lockstep.

mod output;
mod scheduler;
mod timer;

#[cfg(test)]
mod tests;

pub use output::{DigitalOutput, LatchedOutput, Level};
pub use scheduler::{
    DEFAULT_INTERVAL_US, DEFAULT_PULSE_WIDTH_US, PeriodicPulseScheduler, PulseSchedule,
    next_pulse_delay,
};
pub use timer::{Scheduler, TimerCallback, TimerHandle, TokioScheduler};
