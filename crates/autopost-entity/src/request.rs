//! Bulk submission accepted by the queue controller.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use autopost_core::error::AppError;
use autopost_core::types::id::OperationId;

use crate::job::{Job, JobKind, JobPriority};

/// One target of a bulk operation. Becomes one job.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkTarget {
    /// External entity the job acts on (client, content, recipient list).
    #[validate(length(min = 1, max = 256))]
    pub id: String,
    /// Number of work items for this target.
    #[serde(default = "default_item_count")]
    #[validate(range(min = 1))]
    pub item_count: u32,
    /// Target-specific payload; falls back to nothing.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Earliest start time.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl BulkTarget {
    /// A single-item target.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            item_count: default_item_count(),
            payload: serde_json::Value::Null,
            scheduled_at: None,
        }
    }

    /// Set the number of work items.
    pub fn with_items(mut self, item_count: u32) -> Self {
        self.item_count = item_count;
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Hold the job until `at`.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// A request to run one kind of work over many targets.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BulkOperationRequest {
    /// Caller-chosen operation identifier, shared by every resulting job.
    pub operation_id: OperationId,
    /// Kind of work.
    pub category: JobKind,
    /// Priority given to every job.
    #[serde(default)]
    pub priority: JobPriority,
    /// Targets, one job each.
    #[validate(length(min = 1), nested)]
    pub targets: Vec<BulkTarget>,
    /// Retry budget per job; the worker default applies when absent.
    #[validate(range(max = 10))]
    pub max_retries: Option<u32>,
    /// Expected run time per job, for stall detection.
    pub estimated_duration_ms: Option<u64>,
}

impl BulkOperationRequest {
    /// A request with one single-item target per id.
    pub fn new<I, S>(category: JobKind, priority: JobPriority, target_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operation_id: OperationId::new(),
            category,
            priority,
            targets: target_ids.into_iter().map(BulkTarget::new).collect(),
            max_retries: None,
            estimated_duration_ms: None,
        }
    }

    /// A request built from explicit targets.
    pub fn with_targets(category: JobKind, priority: JobPriority, targets: Vec<BulkTarget>) -> Self {
        Self {
            operation_id: OperationId::new(),
            category,
            priority,
            targets,
            max_retries: None,
            estimated_duration_ms: None,
        }
    }

    /// Set the retry budget.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set the expected run time per job.
    pub fn estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration_ms = Some(duration.as_millis() as u64);
        self
    }

    /// Set the same item count on every target.
    pub fn items_per_target(mut self, item_count: u32) -> Self {
        for target in &mut self.targets {
            target.item_count = item_count;
        }
        self
    }

    /// Ids of all targets, in submission order.
    pub fn target_ids(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.id.as_str()).collect()
    }

    /// Reject malformed submissions before any job exists.
    pub fn check(&self) -> Result<(), AppError> {
        self.validate()?;

        if let JobKind::Custom(name) = &self.category {
            if name.trim().is_empty() {
                return Err(AppError::validation("Custom job kind needs a name"));
            }
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            if !seen.insert(target.id.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate target '{}' in operation {}",
                    target.id, self.operation_id
                )));
            }
        }

        Ok(())
    }

    /// Expand into one queued job per target.
    pub fn expand(&self, default_max_retries: u32) -> Vec<Job> {
        let max_retries = self.max_retries.unwrap_or(default_max_retries);

        self.targets
            .iter()
            .map(|target| {
                let mut job = Job::new(
                    self.category.clone(),
                    self.priority,
                    target.item_count,
                    max_retries,
                )
                .with_operation(self.operation_id)
                .with_owner(target.id.clone())
                .with_payload(target.payload.clone());
                job.estimated_duration_ms = self.estimated_duration_ms;
                job.scheduled_at = target.scheduled_at;
                job
            })
            .collect()
    }
}

fn default_item_count() -> u32 {
    1
}
