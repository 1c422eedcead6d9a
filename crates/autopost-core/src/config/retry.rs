//! Retry backoff configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Linear backoff settings for transient job failures.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetryConfig {
    /// Delay in milliseconds multiplied by the attempt number.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    #[validate(range(min = 1))]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    /// Base backoff delay.
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Backoff cap.
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_base_delay() -> u64 {
    2_000
}

fn default_max_delay() -> u64 {
    60_000
}
