//! Offset estimation from one two-way exchange, and its smoothing.
//!
//! Timestamps are taken from two unrelated clocks, so every difference is
//! computed with wrapping `u64` arithmetic and reinterpreted as signed.

use serde::Serialize;

/// Results of a single completed exchange.
///
/// Computed once per response and folded into the statistics and the
/// smoother; not kept afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncAttempt {
    /// Client-clock time from request send to response arrival.
    pub round_trip_us: i64,
    /// Master-clock time between receiving the request and replying.
    pub master_processing_us: i64,
    /// Estimated one-way delay, assuming a symmetric link.
    pub network_delay_us: i64,
    /// Correction to add to the client clock.
    pub offset_us: i64,
}

impl SyncAttempt {
    /// Evaluate one exchange.
    ///
    /// - `t1`: client send time
    /// - `t2_recv`: master receive time
    /// - `t3_send`: master send time
    /// - `t4`: client receive time
    ///
    /// ```text
    /// round_trip = t4 - t1
    /// processing = t3_send - t2_recv
    /// delay      = (round_trip - processing) / 2
    /// offset     = t2_recv + delay - t1
    /// ```
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn calculate(t1: u64, t2_recv: u64, t3_send: u64, t4: u64) -> Self {
        let round_trip_us = t4.wrapping_sub(t1) as i64;
        let master_processing_us = t3_send.wrapping_sub(t2_recv) as i64;
        let network_delay_us = round_trip_us.wrapping_sub(master_processing_us) / 2;
        let offset_us = (t2_recv.wrapping_sub(t1) as i64).wrapping_add(network_delay_us);

        Self {
            round_trip_us,
            master_processing_us,
            network_delay_us,
            offset_us,
        }
    }
}

/// Exponential moving average over raw offsets.
///
/// The first sample seeds the estimate directly; later samples are
/// weighted by `alpha`.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetSmoother {
    alpha: f64,
    value: Option<f64>,
}

impl OffsetSmoother {
    /// Create an empty smoother.
    #[must_use]
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: f64::from(alpha),
            value: None,
        }
    }

    /// Fold in a raw offset and return the new estimate.
    #[allow(clippy::cast_precision_loss)]
    pub fn update(&mut self, offset_us: i64) -> f64 {
        let sample = offset_us as f64;
        let next = match self.value {
            None => sample,
            Some(prev) => (1.0 - self.alpha) * prev + self.alpha * sample,
        };
        self.value = Some(next);
        next
    }

    /// Current estimate, `None` before the first sample.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Estimate rounded to whole microseconds (0 before the first sample).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn offset_us(&self) -> i64 {
        self.value.map_or(0, |v| v.round() as i64)
    }

    /// Smoothing factor.
    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Change the smoothing factor, keeping the current estimate.
    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = f64::from(alpha);
    }

    /// Forget the estimate so the next sample seeds it again.
    pub fn reset(&mut self) {
        self.value = None;
    }
}

/// Cumulative counters for a sync session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SyncStatistics {
    /// Successful exchanges.
    pub sync_count: u64,
    /// Exchanges that timed out.
    pub fail_count: u64,
    /// Raw (unsmoothed) offset of the latest success.
    pub last_offset_us: i64,
    /// Round trip of the latest success.
    pub last_rtt_us: i64,
    /// `100 * sync_count / (sync_count + fail_count)`.
    pub success_rate: f64,
}

impl SyncStatistics {
    /// Account for a completed exchange.
    pub fn record_success(&mut self, attempt: &SyncAttempt) {
        self.sync_count += 1;
        self.last_offset_us = attempt.offset_us;
        self.last_rtt_us = attempt.round_trip_us;
        self.update_rate();
    }

    /// Account for an exchange that got no response.
    pub fn record_timeout(&mut self) {
        self.fail_count += 1;
        self.update_rate();
    }

    /// Total attempts.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.sync_count + self.fail_count
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_rate(&mut self) {
        let attempts = self.attempts();
        self.success_rate = if attempts == 0 {
            0.0
        } else {
            100.0 * self.sync_count as f64 / attempts as f64
        };
    }
}
