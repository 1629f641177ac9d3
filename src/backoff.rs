//! Reconnect delay policy.
//!
//! Capped exponential growth from `base` with a random extra delay of up to
//! `jitter` times the computed value, so a fleet of clients dropped by the
//! same outage does not reconnect in lockstep.

#[cfg(test)]
#[path = "backoff_test.rs"]
mod backoff_test;

use std::time::Duration;

use rand::Rng;

use crate::config::TransportConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
    failures: u32,
}

impl Backoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self { base, max: max.max(base), jitter: jitter.clamp(0.0, 1.0), failures: 0 }
    }

    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.reconnect_base, config.reconnect_max, config.reconnect_jitter)
    }

    /// Delay before the next attempt; each call counts one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.ceiling();
        self.failures = self.failures.saturating_add(1);
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = delay.mul_f64(self.jitter * rand::rng().random::<f64>());
        delay + extra
    }

    /// Delay for the current failure count, before jitter.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        let factor = 1_u32.checked_shl(self.failures.min(31)).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |d| d.min(self.max))
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
