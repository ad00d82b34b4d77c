//! Pulse train aligned to the synchronized epoch.
//!
//! Every firing recomputes the next boundary from the synchronized clock
//! instead of adding the interval to the previous deadline, so offset
//! corrections are picked up on the next pulse and local timer drift never
//! accumulates.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::output::{DigitalOutput, Level};
use super::timer::{Scheduler, TimerCallback, TimerHandle};
use crate::error::PulseError;
use crate::protocol::sync::SyncSource;

/// Default pulse period: one second.
pub const DEFAULT_INTERVAL_US: u64 = 1_000_000;

/// Default pulse width.
pub const DEFAULT_PULSE_WIDTH_US: u64 = 500;

/// Sentinel for "no timer armed".
const NO_TIMER: u64 = 0;

/// Snapshot of the pulse configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSchedule {
    /// Period between rising edges.
    pub interval_us: u64,
    /// Time the output stays ON.
    pub pulse_width_us: u64,
    /// Whether a rising edge is pending.
    pub armed: bool,
}

/// Delay from `synced_now_us` to the next multiple of `interval_us`.
///
/// Always strictly positive: a `synced_now_us` exactly on a boundary
/// yields a full interval. An `interval_us` of zero is treated as one.
#[must_use]
pub fn next_pulse_delay(synced_now_us: i64, interval_us: u64) -> u64 {
    let interval = i128::from(interval_us.max(1));
    let now = i128::from(synced_now_us);
    // ceil(now / interval) * interval, rounding toward +inf for negatives too.
    let next_boundary = -((-now).div_euclid(interval)) * interval;
    let mut delay = next_boundary - now;
    if delay <= 0 {
        delay += interval;
    }
    u64::try_from(delay).unwrap_or(interval_us)
}

struct PulseShared {
    sync: Arc<dyn SyncSource>,
    scheduler: Arc<dyn Scheduler>,
    output: Arc<dyn DigitalOutput>,
    pin: u8,
    interval_us: AtomicU64,
    pulse_width_us: AtomicU64,
    active: AtomicBool,
    pulse_timer: AtomicU64,
    off_timer: AtomicU64,
    on_pulse: TimerCallback,
    on_off: TimerCallback,
}

impl PulseShared {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn pulse_armed(&self) -> bool {
        match self.pulse_timer.load(Ordering::Acquire) {
            NO_TIMER => false,
            raw => self.scheduler.is_armed(TimerHandle::from_raw(raw)),
        }
    }

    fn schedule_next(&self) {
        if !self.is_active() || !self.sync.is_synchronized() {
            return;
        }
        let delay = next_pulse_delay(
            self.sync.synced_time_us(),
            self.interval_us.load(Ordering::Acquire),
        );
        let handle = self
            .scheduler
            .schedule_once(delay, Arc::clone(&self.on_pulse));
        self.pulse_timer.store(handle.raw(), Ordering::Release);

        // Lost a race with stop(): it may have cancelled the previous handle.
        if !self.is_active() {
            self.scheduler.cancel(handle);
        }
    }

    /// Rising edge.
    fn fire(&self) {
        if !self.is_active() {
            return;
        }
        self.output.set_level(self.pin, Level::On);
        let off = self.scheduler.schedule_once(
            self.pulse_width_us.load(Ordering::Acquire),
            Arc::clone(&self.on_off),
        );
        self.off_timer.store(off.raw(), Ordering::Release);

        // stop() may have run after the check above and missed this edge.
        if !self.active.load(Ordering::SeqCst) {
            self.cancel_timer(&self.off_timer);
            self.output.set_level(self.pin, Level::Off);
            return;
        }
        self.schedule_next();
    }

    /// Falling edge.
    fn release(&self) {
        self.output.set_level(self.pin, Level::Off);
    }

    fn on_sync_status(&self, synchronized: bool) {
        if synchronized && self.is_active() && !self.pulse_armed() {
            self.schedule_next();
        }
    }

    fn cancel_timer(&self, slot: &AtomicU64) {
        match slot.swap(NO_TIMER, Ordering::AcqRel) {
            NO_TIMER => {}
            raw => self.scheduler.cancel(TimerHandle::from_raw(raw)),
        }
    }
}

/// Fires an output pulse at every interval boundary of the synchronized
/// clock.
///
/// Arming waits for the clock to report synchronized. Losing sync later
/// does not cancel an armed pulse; only [`stop`](Self::stop) does.
pub struct PeriodicPulseScheduler {
    shared: Arc<PulseShared>,
}

impl PeriodicPulseScheduler {
    /// Drive `pin` on `output` from `sync`'s clock, with the default
    /// interval and width. The pin is forced OFF.
    pub fn new(
        sync: Arc<dyn SyncSource>,
        scheduler: Arc<dyn Scheduler>,
        output: Arc<dyn DigitalOutput>,
        pin: u8,
    ) -> Self {
        output.set_level(pin, Level::Off);

        let shared = Arc::new_cyclic(|weak: &Weak<PulseShared>| {
            let pulse = weak.clone();
            let off = weak.clone();
            PulseShared {
                sync,
                scheduler,
                output,
                pin,
                interval_us: AtomicU64::new(DEFAULT_INTERVAL_US),
                pulse_width_us: AtomicU64::new(DEFAULT_PULSE_WIDTH_US),
                active: AtomicBool::new(false),
                pulse_timer: AtomicU64::new(NO_TIMER),
                off_timer: AtomicU64::new(NO_TIMER),
                on_pulse: Arc::new(move || {
                    if let Some(shared) = pulse.upgrade() {
                        shared.fire();
                    }
                }),
                on_off: Arc::new(move || {
                    if let Some(shared) = off.upgrade() {
                        shared.release();
                    }
                }),
            }
        });

        let weak = Arc::downgrade(&shared);
        shared
            .sync
            .subscribe_status(Arc::new(move |synchronized, _offset| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_sync_status(synchronized);
                }
            }));

        Self { shared }
    }

    /// Set period and pulse width.
    ///
    /// # Errors
    /// - [`PulseError::Running`] while started
    /// - [`PulseError::ZeroInterval`] for a zero period
    /// - [`PulseError::PulseTooWide`] unless the width is below the period
    pub fn configure(&self, interval_us: u64, pulse_width_us: u64) -> Result<(), PulseError> {
        if self.shared.is_active() {
            return Err(PulseError::Running);
        }
        if interval_us == 0 {
            return Err(PulseError::ZeroInterval);
        }
        if pulse_width_us >= interval_us {
            return Err(PulseError::PulseTooWide {
                pulse_width_us,
                interval_us,
            });
        }
        self.shared.interval_us.store(interval_us, Ordering::Release);
        self.shared
            .pulse_width_us
            .store(pulse_width_us, Ordering::Release);
        Ok(())
    }

    /// Begin the pulse train, immediately if synchronized, otherwise on
    /// the next synchronized edge.
    pub fn start(&self) {
        if self.shared.active.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.schedule_next();
    }

    /// Cancel pending timers and force the output OFF. Idempotent.
    pub fn stop(&self) {
        if !self.shared.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.cancel_timer(&self.shared.pulse_timer);
        self.shared.cancel_timer(&self.shared.off_timer);
        self.shared.output.set_level(self.shared.pin, Level::Off);
    }

    /// Whether the train is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.is_active()
    }

    /// Current configuration and arming state.
    #[must_use]
    pub fn schedule(&self) -> PulseSchedule {
        PulseSchedule {
            interval_us: self.shared.interval_us.load(Ordering::Acquire),
            pulse_width_us: self.shared.pulse_width_us.load(Ordering::Acquire),
            armed: self.shared.pulse_armed(),
        }
    }

    /// Output pin being driven.
    #[must_use]
    pub fn pin(&self) -> u8 {
        self.shared.pin
    }
}

impl Drop for PeriodicPulseScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PeriodicPulseScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicPulseScheduler")
            .field("pin", &self.shared.pin)
            .field("running", &self.is_running())
            .field("schedule", &self.schedule())
            .finish_non_exhaustive()
    }
}
