//! Retry policy for assume-role calls

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Exponential backoff with optional jitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[validate(range(min = 1, max = 60000))]
    pub base_delay_ms: u64,

    /// Upper bound for any single delay
    #[validate(range(min = 1, max = 300000))]
    pub max_delay_ms: u64,

    /// Total attempts, including the first
    #[validate(range(min = 1, max = 20))]
    pub max_attempts: u32,

    /// Fraction of the delay randomly added or removed (0.0 disables)
    #[validate(range(min = 0.0, max = 1.0))]
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay_ms: 200,
            max_delay_ms: 5000,
            max_attempts: 4,
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (zero-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = (self.base_delay_ms as f64) * 2f64.powi(attempt.min(30) as i32);
        let capped = base.min(self.max_delay_ms as f64);

        let jitter_range = capped * self.jitter;
        let jitter = if jitter_range > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `attempts` tries
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
