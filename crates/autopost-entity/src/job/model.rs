//! Job entity model.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use autopost_core::error::AppError;
use autopost_core::types::id::{JobId, OperationId};

use super::kind::JobKind;
use super::status::{JobPriority, JobStatus};

/// A unit of bulk work tracked by the queue.
///
/// Status changes go through [`Job::transition`] and its wrappers, which
/// enforce the lifecycle and keep `processed_count ≤ item_count` and
/// `retry_count ≤ max_retries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Bulk operation this job was expanded from.
    pub operation_id: Option<OperationId>,
    /// What kind of work the job performs.
    pub kind: JobKind,
    /// Current job status.
    pub status: JobStatus,
    /// Job priority.
    pub priority: JobPriority,
    /// Executor-specific payload (JSON).
    pub payload: serde_json::Value,
    /// Number of work items in the job.
    pub item_count: u32,
    /// Number of work items processed in the current run.
    pub processed_count: u32,
    /// Automatic retries consumed so far.
    pub retry_count: u32,
    /// Automatic retry budget.
    pub max_retries: u32,
    /// Opaque reference to the external entity the job acts on.
    pub owner_ref: Option<String>,
    /// Expected run time, used for stall detection.
    pub estimated_duration_ms: Option<u64>,
    /// Error message, present only while the job is failed.
    pub error_message: Option<String>,
    /// Earliest time the job may start (None = immediately).
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the job was admitted into the queue.
    pub queued_at: DateTime<Utc>,
    /// When the latest run started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached `Completed` or `Failed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(kind: JobKind, priority: JobPriority, item_count: u32, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            operation_id: None,
            kind,
            status: JobStatus::Queued,
            priority,
            payload: serde_json::Value::Null,
            item_count,
            processed_count: 0,
            retry_count: 0,
            max_retries,
            owner_ref: None,
            estimated_duration_ms: None,
            error_message: None,
            scheduled_at: None,
            queued_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Attach the originating bulk operation.
    pub fn with_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// Attach the external entity reference.
    pub fn with_owner(mut self, owner_ref: impl Into<String>) -> Self {
        self.owner_ref = Some(owner_ref.into());
        self
    }

    /// Set the executor payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the expected run time.
    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Hold the job back until `at`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    /// Percentage of items processed, derived from the counters.
    pub fn progress(&self) -> f64 {
        if self.item_count == 0 {
            return if self.status == JobStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        f64::from(self.processed_count) / f64::from(self.item_count) * 100.0
    }

    /// Automatic retries left.
    pub fn remaining_retries(&self) -> u32 {
        self.max_retries.saturating_sub(self.retry_count)
    }

    /// Check if the job is failed with retry budget left.
    pub fn can_retry(&self) -> bool {
        self.status.can_retry() && self.retry_count < self.max_retries
    }

    /// Expected run time, if one was supplied.
    pub fn estimated_duration(&self) -> Option<Duration> {
        self.estimated_duration_ms.map(Duration::from_millis)
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), AppError> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::conflict(format!(
                "Job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        if self.status == JobStatus::Failed {
            self.error_message = None;
            self.completed_at = None;
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Begin a run.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(JobStatus::Running, now)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// Record the executor's processed count.
    ///
    /// Returns `true` if progress advanced. Counts lower than the current one
    /// are ignored so progress never goes backwards within a run.
    pub fn record_progress(&mut self, processed: u32, now: DateTime<Utc>) -> Result<bool, AppError> {
        if processed > self.item_count {
            return Err(AppError::invalid_state(format!(
                "Job {} reported {} processed items out of {}",
                self.id, processed, self.item_count
            )));
        }

        if self.status != JobStatus::Running || processed <= self.processed_count {
            return Ok(false);
        }

        self.processed_count = processed;
        self.updated_at = now;
        Ok(true)
    }

    /// Mark the job completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(JobStatus::Completed, now)?;
        self.processed_count = self.item_count;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Mark the job failed with an error message.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) -> Result<(), AppError> {
        self.transition(JobStatus::Failed, now)?;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Consume one retry and put the job back in the queue with its
    /// progress reset.
    pub fn requeue_for_retry(&mut self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.retry_count >= self.max_retries {
            return Err(AppError::invalid_state(format!(
                "Job {} has no retries left ({}/{})",
                self.id, self.retry_count, self.max_retries
            )));
        }

        self.transition(JobStatus::Queued, now)?;
        self.retry_count += 1;
        self.processed_count = 0;
        Ok(())
    }

    /// Restore the full retry budget before a manual retry.
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }
}
