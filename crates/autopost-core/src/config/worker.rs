//! Worker pool and queue controller configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Background job worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Hard ceiling on concurrently running jobs.
    #[serde(default = "default_max_workers")]
    #[validate(range(min = 1, max = 256))]
    pub max_workers: usize,
    /// Interval in milliseconds between controller housekeeping ticks
    /// (retry promotion, stall detection, dispatch).
    #[serde(default = "default_tick_interval")]
    #[validate(range(min = 1, max = 60000))]
    pub tick_interval_ms: u64,
    /// Capacity of the executor → controller progress channel.
    #[serde(default = "default_ingress_capacity")]
    #[validate(range(min = 1))]
    pub ingress_capacity: usize,
    /// Capacity of the status event broadcast channel.
    #[serde(default = "default_event_buffer")]
    #[validate(range(min = 1))]
    pub event_buffer: usize,
    /// Maximum number of job records the queue holds.
    #[serde(default = "default_max_queued_jobs")]
    #[validate(range(min = 1))]
    pub max_queued_jobs: usize,
    /// Retry budget for jobs whose submission does not set one.
    #[serde(default = "default_max_retries")]
    #[validate(range(max = 10))]
    pub default_max_retries: u32,
    /// A running job is force-failed once it exceeds this multiple of its
    /// estimated duration.
    #[serde(default = "default_stall_multiplier")]
    #[validate(range(min = 1.0))]
    pub stall_multiplier: f64,
    /// Leave failed jobs out of the batch progress denominator.
    #[serde(default)]
    pub exclude_failed_from_progress: bool,
    /// Seconds to wait for in-flight jobs on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl WorkerConfig {
    /// Housekeeping tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            tick_interval_ms: default_tick_interval(),
            ingress_capacity: default_ingress_capacity(),
            event_buffer: default_event_buffer(),
            max_queued_jobs: default_max_queued_jobs(),
            default_max_retries: default_max_retries(),
            stall_multiplier: default_stall_multiplier(),
            exclude_failed_from_progress: false,
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_tick_interval() -> u64 {
    250
}

fn default_ingress_capacity() -> usize {
    1024
}

fn default_event_buffer() -> usize {
    256
}

fn default_max_queued_jobs() -> usize {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_stall_multiplier() -> f64 {
    3.0
}

fn default_shutdown_grace() -> u64 {
    30
}
