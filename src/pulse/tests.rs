use std::sync::{Arc, OnceLock, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;

use super::*;
use crate::error::PulseError;
use crate::testing::{ManualScheduler, ManualSyncSource, RecordingOutput, SimClock};

const PIN: u8 = 4;

struct Bench {
    clock: SimClock,
    sync: Arc<ManualSyncSource>,
    timers: Arc<ManualScheduler>,
    output: Arc<RecordingOutput>,
    pulse: PeriodicPulseScheduler,
}

impl Bench {
    fn new(start_us: u64) -> Self {
        let clock = SimClock::new(start_us);
        let sync = Arc::new(ManualSyncSource::new(clock.clone()));
        let timers = Arc::new(ManualScheduler::new(clock.clone()));
        let output = Arc::new(RecordingOutput::new(clock.clone()));
        let pulse = PeriodicPulseScheduler::new(sync.clone(), timers.clone(), output.clone(), PIN);
        Self {
            clock,
            sync,
            timers,
            output,
            pulse,
        }
    }

    fn synced(start_us: u64) -> Self {
        let bench = Self::new(start_us);
        bench.sync.set_synchronized(true);
        bench
    }
}

// --- next_pulse_delay ---

#[test]
fn test_next_pulse_delay_mid_interval() {
    assert_eq!(next_pulse_delay(2_300_000, 1_000_000), 700_000);
    assert_eq!(next_pulse_delay(999_999, 1_000_000), 1);
}

#[test]
fn test_next_pulse_delay_on_boundary_waits_full_interval() {
    assert_eq!(next_pulse_delay(2_000_000, 1_000_000), 1_000_000);
    assert_eq!(next_pulse_delay(0, 1_000_000), 1_000_000);
}

#[test]
fn test_next_pulse_delay_negative_time() {
    assert_eq!(next_pulse_delay(-300_000, 1_000_000), 300_000);
    assert_eq!(next_pulse_delay(-1_000_000, 1_000_000), 1_000_000);
    assert_eq!(next_pulse_delay(-1_000_001, 1_000_000), 1);
}

#[test]
fn test_next_pulse_delay_extremes() {
    assert_eq!(next_pulse_delay(5, 0), 1);
    assert!(next_pulse_delay(i64::MAX, 1_000_000) <= 1_000_000);
    assert!(next_pulse_delay(i64::MIN, 1_000_000) <= 1_000_000);
}

proptest! {
    #[test]
    fn prop_next_pulse_lands_on_boundary(
        now in -10_000_000_000i64..10_000_000_000,
        interval in 1u64..10_000_000,
    ) {
        let delay = next_pulse_delay(now, interval);
        prop_assert!(delay > 0 && delay <= interval);
        let landed = i128::from(now) + i128::from(delay);
        prop_assert_eq!(landed.rem_euclid(i128::from(interval)), 0);
    }
}

// --- configure ---

#[test]
fn test_defaults() {
    let bench = Bench::new(0);
    assert_eq!(
        bench.pulse.schedule(),
        PulseSchedule {
            interval_us: DEFAULT_INTERVAL_US,
            pulse_width_us: DEFAULT_PULSE_WIDTH_US,
            armed: false,
        }
    );
    assert_eq!(bench.pulse.pin(), PIN);
    assert!(!bench.pulse.is_running());
}

#[test]
fn test_new_forces_pin_off() {
    let bench = Bench::new(0);
    let transitions = bench.output.transitions();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].level, Level::Off);
    assert_eq!(bench.sync.subscriber_count(), 1);
}

#[test]
fn test_configure_validation() {
    let bench = Bench::new(0);
    assert_eq!(bench.pulse.configure(0, 0), Err(PulseError::ZeroInterval));
    assert_eq!(
        bench.pulse.configure(1_000, 1_000),
        Err(PulseError::PulseTooWide {
            pulse_width_us: 1_000,
            interval_us: 1_000
        })
    );
    bench.pulse.configure(500_000, 2_000).unwrap();

    bench.pulse.start();
    assert_eq!(
        bench.pulse.configure(250_000, 100),
        Err(PulseError::Running)
    );
    assert_eq!(bench.pulse.schedule().interval_us, 500_000);
}

// --- pulse train ---

#[test]
fn test_start_deferred_until_synchronized() {
    let bench = Bench::new(2_300_000);
    bench.pulse.start();
    assert!(bench.pulse.is_running());
    assert!(!bench.pulse.schedule().armed);
    assert_eq!(bench.timers.pending_count(), 0);

    bench.sync.set_synchronized(true);
    assert!(bench.pulse.schedule().armed);
    assert_eq!(bench.timers.next_deadline(), Some(3_000_000));
}

#[test]
fn test_sync_edge_without_start_schedules_nothing() {
    let bench = Bench::new(0);
    bench.sync.set_synchronized(true);
    assert_eq!(bench.timers.pending_count(), 0);
}

#[test]
fn test_pulses_on_interval_boundaries() {
    let bench = Bench::synced(2_300_000);
    bench.pulse.start();
    bench.timers.run_until(5_600_000);

    assert_eq!(
        bench.output.rising_edges(PIN),
        vec![3_000_000, 4_000_000, 5_000_000]
    );
    let falls: Vec<u64> = bench
        .output
        .transitions()
        .iter()
        .skip(1)
        .filter(|t| t.level == Level::Off)
        .map(|t| t.at_us)
        .collect();
    assert_eq!(falls, vec![3_000_500, 4_000_500, 5_000_500]);
    assert_eq!(bench.timers.deadlines(), vec![6_000_000]);
}

#[test]
fn test_pulses_follow_synced_clock() {
    let bench = Bench::synced(2_300_000);
    bench.sync.set_offset(250_000);
    bench.pulse.start();
    bench.timers.run_until(4_000_000);

    assert_eq!(bench.output.rising_edges(PIN), vec![2_750_000, 3_750_000]);
}

#[test]
fn test_offset_change_applies_to_following_pulse() {
    let bench = Bench::synced(2_300_000);
    bench.pulse.start();
    bench.timers.run_until(3_000_600);

    bench.sync.set_offset(100_000);
    bench.timers.run_until(5_000_000);

    // 4_000_000 was armed before the change.
    assert_eq!(
        bench.output.rising_edges(PIN),
        vec![3_000_000, 4_000_000, 4_900_000]
    );
}

#[test]
fn test_custom_interval_and_width() {
    let bench = Bench::synced(100_000);
    bench.pulse.configure(250_000, 10_000).unwrap();
    bench.pulse.start();
    bench.timers.run_until(759_999);

    assert_eq!(
        bench.output.rising_edges(PIN),
        vec![250_000, 500_000, 750_000]
    );
    assert_eq!(bench.output.level(PIN), Level::On);
    bench.timers.run_until(760_000);
    assert_eq!(bench.output.level(PIN), Level::Off);
}

#[test]
fn test_start_twice_arms_once() {
    let bench = Bench::synced(0);
    bench.pulse.start();
    bench.pulse.start();
    assert_eq!(bench.timers.pending_count(), 1);
}

// --- stop ---

#[test]
fn test_stop_mid_pulse_forces_off() {
    let bench = Bench::synced(2_300_000);
    bench.pulse.start();
    bench.timers.run_until(3_000_100);
    assert_eq!(bench.output.level(PIN), Level::On);

    bench.pulse.stop();
    assert_eq!(bench.output.level(PIN), Level::Off);
    assert_eq!(bench.timers.pending_count(), 0);
    assert!(!bench.pulse.schedule().armed);

    let recorded = bench.output.transitions().len();
    bench.pulse.stop();
    assert_eq!(bench.output.transitions().len(), recorded);

    bench.timers.run_until(10_000_000);
    assert_eq!(bench.output.rising_edges(PIN), vec![3_000_000]);
}

#[test]
fn test_restart_after_stop() {
    let bench = Bench::synced(2_300_000);
    bench.pulse.start();
    bench.pulse.stop();
    bench.clock.set(7_200_000);
    bench.pulse.start();
    bench.timers.run_until(8_100_000);
    assert_eq!(bench.output.rising_edges(PIN), vec![8_000_000]);
}

#[test]
fn test_drop_stops_train() {
    let bench = Bench::synced(0);
    bench.pulse.start();
    let Bench {
        timers,
        output,
        pulse,
        ..
    } = bench;
    drop(pulse);

    assert_eq!(timers.pending_count(), 0);
    assert_eq!(output.level(PIN), Level::Off);
}

/// Scheduler that never disarms, so stale callbacks still run.
#[derive(Default)]
struct StaleScheduler {
    callbacks: Mutex<Vec<TimerCallback>>,
}

impl Scheduler for StaleScheduler {
    fn schedule_once(&self, _delay_us: u64, callback: TimerCallback) -> TimerHandle {
        let mut callbacks = self.callbacks.lock();
        callbacks.push(callback);
        TimerHandle::from_raw(callbacks.len() as u64)
    }

    fn cancel(&self, _handle: TimerHandle) {}

    fn is_armed(&self, _handle: TimerHandle) -> bool {
        true
    }
}

#[test]
fn test_callback_after_stop_is_noop() {
    let clock = SimClock::new(0);
    let sync = Arc::new(ManualSyncSource::new(clock.clone()));
    sync.set_synchronized(true);
    let timers = Arc::new(StaleScheduler::default());
    let output = Arc::new(RecordingOutput::new(clock));
    let pulse = PeriodicPulseScheduler::new(sync, timers.clone(), output.clone(), PIN);

    pulse.start();
    pulse.stop();

    let stale = timers.callbacks.lock().clone();
    assert_eq!(stale.len(), 1);
    for callback in &stale {
        callback();
    }
    assert!(output.rising_edges(PIN).is_empty());
    assert_eq!(timers.callbacks.lock().len(), 1);
}

/// Stops its scheduler from inside the rising edge, the way a concurrent
/// `stop()` lands between the active check and the ON write.
#[derive(Default)]
struct StopOnRise {
    pulse: OnceLock<Weak<PeriodicPulseScheduler>>,
    levels: Mutex<Vec<Level>>,
}

impl DigitalOutput for StopOnRise {
    fn set_level(&self, _pin: u8, level: Level) {
        self.levels.lock().push(level);
        if level == Level::On {
            if let Some(pulse) = self.pulse.get().and_then(Weak::upgrade) {
                pulse.stop();
            }
        }
    }
}

#[test]
fn test_stop_during_rising_edge_leaves_output_off() {
    let clock = SimClock::new(2_300_000);
    let sync = Arc::new(ManualSyncSource::new(clock.clone()));
    sync.set_synchronized(true);
    let timers = Arc::new(ManualScheduler::new(clock));
    let output = Arc::new(StopOnRise::default());
    let pulse = Arc::new(PeriodicPulseScheduler::new(
        sync,
        timers.clone(),
        output.clone(),
        PIN,
    ));
    assert!(output.pulse.set(Arc::downgrade(&pulse)).is_ok());

    pulse.start();
    assert_eq!(timers.run_until(3_000_000), 1);

    assert!(!pulse.is_running());
    assert_eq!(output.levels.lock().last(), Some(&Level::Off));
    assert_eq!(timers.pending_count(), 0);
}

// --- sync loss ---

#[test]
fn test_desync_keeps_armed_pulse() {
    let bench = Bench::synced(2_300_000);
    bench.pulse.start();
    bench.sync.set_synchronized(false);
    assert!(bench.pulse.schedule().armed);

    bench.timers.run_until(3_600_000);
    assert_eq!(bench.output.rising_edges(PIN), vec![3_000_000]);
    assert_eq!(bench.output.level(PIN), Level::Off);
    assert_eq!(bench.timers.pending_count(), 0);

    bench.sync.set_synchronized(true);
    assert_eq!(bench.timers.deadlines(), vec![4_000_000]);
}

#[test]
fn test_resync_while_armed_does_not_double_schedule() {
    let bench = Bench::synced(2_300_000);
    bench.pulse.start();
    bench.sync.set_synchronized(false);
    bench.sync.set_synchronized(true);
    assert_eq!(bench.timers.pending_count(), 1);
}

// --- LatchedOutput ---

#[test]
fn test_latched_output_levels() {
    let output = LatchedOutput::new();
    assert_eq!(output.level(255), Level::Off);
    output.set_level(255, Level::On);
    output.set_level(0, Level::On);
    output.set_level(0, Level::Off);
    assert_eq!(output.level(255), Level::On);
    assert_eq!(output.level(0), Level::Off);
    assert_eq!(Level::from(true), Level::On);
}

// --- TokioScheduler ---

#[test]
fn test_tokio_scheduler_needs_runtime() {
    assert!(TokioScheduler::try_current().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_fires_once() {
    let timers = TokioScheduler::try_current().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let handle = timers.schedule_once(
        1_500,
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert!(timers.is_armed(handle));
    assert_eq!(timers.pending_count(), 1);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!timers.is_armed(handle));
    assert_eq!(timers.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_cancel() {
    let timers = TokioScheduler::try_current().unwrap();
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    let handle = timers.schedule_once(
        1_000,
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );
    timers.cancel(handle);
    timers.cancel(handle);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(!timers.is_armed(handle));
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_handles_are_unique() {
    let timers = TokioScheduler::try_current().unwrap();
    let noop: TimerCallback = Arc::new(|| {});
    let a = timers.schedule_once(10, Arc::clone(&noop));
    let b = timers.schedule_once(10, noop);
    assert_ne!(a, b);
    assert_ne!(a.raw(), 0);
    drop(timers);
}

#[tokio::test(start_paused = true)]
async fn test_pulse_train_on_tokio_timers() {
    let clock = SimClock::new(0);
    let sync = Arc::new(ManualSyncSource::new(clock));
    sync.set_synchronized(true);
    let output = Arc::new(LatchedOutput::new());
    let timers = Arc::new(TokioScheduler::try_current().unwrap());
    let pulse = PeriodicPulseScheduler::new(sync, timers.clone(), output.clone(), PIN);
    pulse.configure(10_000, 2_000).unwrap();

    // Synced time is frozen at zero, so the first pulse is one interval out.
    pulse.start();
    tokio::time::sleep(Duration::from_micros(11_000)).await;
    assert_eq!(output.level(PIN), Level::On);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(output.level(PIN), Level::Off);
    assert!(pulse.schedule().armed);

    pulse.stop();
    assert_eq!(timers.pending_count(), 0);
}
