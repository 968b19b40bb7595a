//! Retry delays for failed ticks.

use std::time::Duration;

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Growth factor per consecutive failure
    pub multiplier: f64,
    /// Minimum wait after the source throttled us
    pub throttle_floor: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            throttle_floor: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given consecutive failure count (1-based)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_millis = (self.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(delay_millis).min(self.max_delay)
    }
}

/// Consecutive-failure tracker
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Register a failure and return how long to wait before retrying
    pub fn record_failure(&mut self, throttled: bool) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.policy.delay_for_attempt(self.failures);
        if throttled {
            delay
                .max(self.policy.throttle_floor)
                .min(self.policy.max_delay.max(self.policy.throttle_floor))
        } else {
            delay
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
