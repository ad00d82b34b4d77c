use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the synchronization engine
///
/// Serializes with field names matching the knobs below; missing fields
/// take their defaults when loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// Transport-specific channel (radio channel, 0 = current)
    pub channel: u8,

    /// Weight of each new offset sample in the moving average (default: 0.05)
    pub smoothing_alpha: f32,

    /// Interval between attempts while synchronized (default: 1000ms)
    pub sync_interval_ms: u32,

    /// How long to wait for a response (default: 50ms)
    pub response_timeout_ms: u32,

    /// Emit diagnostics through `tracing`
    pub enable_logging: bool,

    /// Successes between diagnostic summaries (default: 10)
    pub log_interval_syncs: u32,

    /// Interval between attempts while unsynchronized (default: 200ms)
    pub resync_interval_ms: u32,

    /// Consecutive timeouts that drop a synchronized client back to
    /// unsynchronized (default: 3, 0 = never)
    pub max_missed_responses: u32,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            channel: 0,
            smoothing_alpha: 0.05,
            sync_interval_ms: 1000,
            response_timeout_ms: 50,
            enable_logging: false,
            log_interval_syncs: 10,
            resync_interval_ms: 200,
            max_missed_responses: 3,
        }
    }
}

impl TimeSyncConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> TimeSyncConfigBuilder {
        TimeSyncConfigBuilder::default()
    }

    /// Attempt interval while synchronized
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.sync_interval_ms))
    }

    /// Attempt interval while unsynchronized
    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.resync_interval_ms))
    }

    /// Bounded wait for a single response
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.response_timeout_ms))
    }

    /// Check that every knob is usable.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.smoothing_alpha > 0.0 && self.smoothing_alpha <= 1.0) {
            return Err(ConfigError::SmoothingAlpha(self.smoothing_alpha));
        }
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::ZeroSyncInterval);
        }
        if self.resync_interval_ms == 0 {
            return Err(ConfigError::ZeroResyncInterval);
        }
        if self.response_timeout_ms == 0 {
            return Err(ConfigError::ZeroResponseTimeout);
        }
        if self.log_interval_syncs == 0 {
            return Err(ConfigError::ZeroLogInterval);
        }
        let interval_ms = self.sync_interval_ms.min(self.resync_interval_ms);
        if self.response_timeout_ms >= interval_ms {
            return Err(ConfigError::ResponseTimeoutTooLong {
                timeout_ms: self.response_timeout_ms,
                interval_ms,
            });
        }
        Ok(())
    }

    /// Load and validate a configuration from JSON.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed JSON, or a validation error.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] if serialization fails.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Builder for `TimeSyncConfig`
#[derive(Debug, Clone, Default)]
pub struct TimeSyncConfigBuilder {
    config: TimeSyncConfig,
}

impl TimeSyncConfigBuilder {
    /// Set transport channel
    #[must_use]
    pub fn channel(mut self, channel: u8) -> Self {
        self.config.channel = channel;
        self
    }

    /// Set smoothing factor
    #[must_use]
    pub fn smoothing_alpha(mut self, alpha: f32) -> Self {
        self.config.smoothing_alpha = alpha;
        self
    }

    /// Set attempt interval while synchronized
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.config.sync_interval_ms = duration_to_ms(interval);
        self
    }

    /// Set attempt interval while unsynchronized
    #[must_use]
    pub fn resync_interval(mut self, interval: Duration) -> Self {
        self.config.resync_interval_ms = duration_to_ms(interval);
        self
    }

    /// Set response timeout
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Enable diagnostic logging
    #[must_use]
    pub fn enable_logging(mut self, enable: bool) -> Self {
        self.config.enable_logging = enable;
        self
    }

    /// Set successes between diagnostic summaries
    #[must_use]
    pub fn log_interval_syncs(mut self, syncs: u32) -> Self {
        self.config.log_interval_syncs = syncs;
        self
    }

    /// Set consecutive timeouts tolerated while synchronized
    #[must_use]
    pub fn max_missed_responses(mut self, missed: u32) -> Self {
        self.config.max_missed_responses = missed;
        self
    }

    /// Build the configuration
    #[must_use]
    pub fn build(self) -> TimeSyncConfig {
        self.config
    }
}

fn duration_to_ms(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
