//! Retry backoff policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempt budget and exponential backoff for failed deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total delivery attempts per batch, including the first one.
    pub max_attempts: u32,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_retry_delay_ms: 5000,
            max_retry_delay_ms: 60000,
        }
    }
}

impl RetryPolicy {
    /// Attempt budget, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Whether `attempt` (1-based) is the final one.
    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt >= self.attempts()
    }

    /// Delay before the next attempt after `failures` failed attempts so far
    /// (0-based), with ±25% jitter.
    pub fn delay_for(&self, failures: u32) -> Duration {
        // delay = base * 2^failures, capped
        let delay_ms = self
            .initial_retry_delay_ms
            .saturating_mul(2u64.saturating_pow(failures))
            .min(self.max_retry_delay_ms);

        let jitter_range = delay_ms / 4;
        let delay_ms = if jitter_range > 0 {
            delay_ms
                .saturating_sub(jitter_range)
                .saturating_add(rand::random::<u64>() % (jitter_range * 2 + 1))
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms)
    }
}
