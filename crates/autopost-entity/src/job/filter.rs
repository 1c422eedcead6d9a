//! Job listing filter.

use serde::{Deserialize, Serialize};

use autopost_core::types::id::OperationId;

use super::kind::JobKind;
use super::model::Job;
use super::status::JobStatus;

/// Criteria for listing jobs. Empty criteria match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobFilter {
    /// Only jobs in one of these statuses.
    #[serde(default)]
    pub statuses: Vec<JobStatus>,
    /// Only jobs of this kind.
    pub kind: Option<JobKind>,
    /// Only jobs from this bulk operation.
    pub operation_id: Option<OperationId>,
    /// Only jobs acting on this external entity.
    pub owner_ref: Option<String>,
}

impl JobFilter {
    /// Match every job.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match jobs that are queued, running, or paused.
    pub fn active() -> Self {
        Self::default().with_statuses(&[JobStatus::Queued, JobStatus::Running, JobStatus::Paused])
    }

    /// Restrict to the given statuses.
    pub fn with_statuses(mut self, statuses: &[JobStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    /// Restrict to one bulk operation.
    pub fn for_operation(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// Restrict to one job kind.
    pub fn of_kind(mut self, kind: JobKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Check a job against the filter.
    pub fn matches(&self, job: &Job) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&job.status))
            && self.kind.as_ref().is_none_or(|k| *k == job.kind)
            && self.operation_id.is_none_or(|op| job.operation_id == Some(op))
            && self
                .owner_ref
                .as_deref()
                .is_none_or(|owner| job.owner_ref.as_deref() == Some(owner))
    }
}
