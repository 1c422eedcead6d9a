//! Turns scheduled posts into queue work.

use std::time::Duration;

use tracing;

use autopost_core::error::AppError;
use autopost_entity::job::{JobKind, JobPriority};
use autopost_entity::request::{BulkOperationRequest, BulkTarget};
use autopost_entity::schedule::PostAssignment;

/// Builds a `PostingAssignment` bulk operation from optimizer output.
///
/// Each assignment becomes one target whose payload is the assignment
/// itself and whose start time is the assigned publish time.
#[derive(Debug, Clone, Default)]
pub struct PostingPlanner {
    priority: JobPriority,
    max_retries: Option<u32>,
    estimated_duration: Option<Duration>,
}

impl PostingPlanner {
    /// Creates a planner with normal priority and default retries.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Expected publish time per post, for stall detection.
    pub fn with_estimated_duration(mut self, duration: Duration) -> Self {
        self.estimated_duration = Some(duration);
        self
    }

    /// Build the request.
    pub fn plan(&self, assignments: &[PostAssignment]) -> Result<BulkOperationRequest, AppError> {
        if assignments.is_empty() {
            return Err(AppError::validation("No post assignments to plan"));
        }

        let targets = assignments
            .iter()
            .map(|assignment| {
                Ok(BulkTarget::new(assignment.target_id())
                    .with_payload(serde_json::to_value(assignment)?)
                    .scheduled_for(assignment.assigned_time))
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        let mut request =
            BulkOperationRequest::with_targets(JobKind::PostingAssignment, self.priority, targets);
        if let Some(max_retries) = self.max_retries {
            request = request.max_retries(max_retries);
        }
        if let Some(duration) = self.estimated_duration {
            request = request.estimated_duration(duration);
        }

        tracing::debug!(
            "Planned operation {} with {} posts",
            request.operation_id,
            request.targets.len()
        );
        Ok(request)
    }
}
