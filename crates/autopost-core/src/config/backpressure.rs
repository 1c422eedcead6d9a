//! Admission backpressure configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Thresholds on the resource usage proxy (0.0 – 1.0) that gate admission
/// of new jobs into the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackpressureConfig {
    /// Whether admission control is active.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Usage at or above which admission pauses.
    #[serde(default = "default_high_watermark")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub high_watermark: f64,
    /// Usage below which admission resumes after pausing.
    #[serde(default = "default_low_watermark")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub low_watermark: f64,
    /// How long admission stays paused after an executor reports resource
    /// exhaustion, in milliseconds.
    #[serde(default = "default_cooldown")]
    pub cooldown_ms: u64,
}

impl BackpressureConfig {
    /// Cool-down after a resource exhaustion report.
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_watermark: default_high_watermark(),
            low_watermark: default_low_watermark(),
            cooldown_ms: default_cooldown(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_high_watermark() -> f64 {
    0.9
}

fn default_low_watermark() -> f64 {
    0.75
}

fn default_cooldown() -> u64 {
    5_000
}
