//! Bounded exponential backoff for channel deliveries.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.75, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// True while another attempt is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts()
    }

    /// Delay to wait after the given (1-indexed) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let initial_ms = self.config.initial_delay.as_millis() as f64;
        let base_ms = initial_ms * self.config.multiplier.powi(attempt as i32 - 1);
        let capped_ms = base_ms.min(self.config.max_delay.as_millis() as f64);

        let delay_ms = if self.config.jitter {
            capped_ms * rand::rng().random_range(0.75..=1.0)
        } else {
            capped_ms
        };

        let delay = Duration::from_millis(delay_ms as u64);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Calculated retry delay");
        delay
    }
}
