//! Retry policy: classifies executor failures and computes backoff.

use std::time::Duration;

use autopost_core::config::RetryConfig;
use autopost_core::error::ErrorKind;
use autopost_entity::job::Job;

use crate::executor::JobExecutionError;

/// How a failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth another attempt after a delay.
    Transient,
    /// Retrying cannot help.
    Permanent,
    /// The system is out of resources; the job itself is fine.
    ResourceExhausted,
}

/// What to do with a job whose run just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after `delay`; this will be retry number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Mark the job failed.
    Fail,
    /// Requeue without consuming a retry once admission resumes.
    Defer,
}

/// Linear backoff capped at a maximum delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy with explicit delays.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Create a policy from configuration.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay())
    }

    /// Classify an executor error.
    pub fn classify(error: &JobExecutionError) -> FailureClass {
        match error {
            JobExecutionError::Transient(_) => FailureClass::Transient,
            JobExecutionError::ResourceExhausted(_) => FailureClass::ResourceExhausted,
            JobExecutionError::Permanent(_) | JobExecutionError::Interrupted(_) => {
                FailureClass::Permanent
            }
            JobExecutionError::Internal(e) if e.kind.is_transient() => FailureClass::Transient,
            JobExecutionError::Internal(e) if e.kind == ErrorKind::ResourceExhausted => {
                FailureClass::ResourceExhausted
            }
            JobExecutionError::Internal(_) => FailureClass::Permanent,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_delay)
    }

    /// Decide what happens to `job` after `error`.
    pub fn decide(&self, job: &Job, error: &JobExecutionError) -> RetryDecision {
        match Self::classify(error) {
            FailureClass::Transient if job.retry_count < job.max_retries => {
                let attempt = job.retry_count + 1;
                RetryDecision::Retry {
                    attempt,
                    delay: self.backoff(attempt),
                }
            }
            FailureClass::Transient | FailureClass::Permanent => RetryDecision::Fail,
            FailureClass::ResourceExhausted => RetryDecision::Defer,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
