//! Link condition simulation for testing

use rand::Rng;

/// Link condition simulator
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkSimulator {
    /// Datagram loss probability (0.0 to 1.0)
    pub loss_rate: f64,
    /// Jitter range (max extra delay)
    pub jitter_us: u64,
    /// One-way delay added to all datagrams
    pub delay_us: u64,
}

impl NetworkSimulator {
    /// Perfect link (instant, lossless)
    #[must_use]
    pub fn perfect() -> Self {
        Self {
            loss_rate: 0.0,
            jitter_us: 0,
            delay_us: 0,
        }
    }

    /// Lossless link with a fixed one-way delay
    #[must_use]
    pub fn fixed_delay(delay_us: u64) -> Self {
        Self {
            delay_us,
            ..Self::perfect()
        }
    }

    /// Short-range radio link between nearby nodes
    #[must_use]
    pub fn short_range() -> Self {
        Self {
            loss_rate: 0.001,
            jitter_us: 200,
            delay_us: 400,
        }
    }

    /// Congested channel at the edge of range
    #[must_use]
    pub fn congested() -> Self {
        Self {
            loss_rate: 0.05,
            jitter_us: 5_000,
            delay_us: 2_000,
        }
    }

    /// Should this datagram be dropped?
    #[must_use]
    pub fn should_drop(&self) -> bool {
        if self.loss_rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_bool(self.loss_rate.min(1.0))
    }

    /// One-way delay for this datagram
    #[must_use]
    pub fn get_delay_us(&self) -> u64 {
        let jitter = if self.jitter_us > 0 {
            rand::thread_rng().gen_range(0..self.jitter_us)
        } else {
            0
        };
        self.delay_us + jitter
    }
}

impl Default for NetworkSimulator {
    fn default() -> Self {
        Self::perfect()
    }
}
