use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget for read-only gateway calls. Mutations are never retried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl RetryPolicy {
    /// One attempt, no backoff.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_backoff_ms: 0 }
    }

    /// Linear backoff before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(attempt as u64))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 200,
        }
    }
}
