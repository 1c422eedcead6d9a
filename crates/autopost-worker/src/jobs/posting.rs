//! Posting executor: publishes one scheduled post per job.

use std::sync::Arc;

use async_trait::async_trait;
use tracing;

use autopost_core::error::{AppError, ErrorKind};
use autopost_entity::job::{Job, JobKind, JobStatus};
use autopost_entity::schedule::{PostAssignment, PostStatus};

use crate::executor::{Executor, JobExecutionError};
use crate::reporter::ProgressReporter;

/// Publishes a post to its platform. Decouples the executor from platform
/// API clients.
#[async_trait]
pub trait Publisher: Send + Sync + std::fmt::Debug {
    /// Publish one assignment.
    ///
    /// Rate limits and network errors should come back as transient error
    /// kinds; rejected content and exhausted quotas as permanent ones.
    async fn publish(&self, assignment: &PostAssignment) -> Result<(), AppError>;
}

/// Runs `PostingAssignment` jobs whose payload is a [`PostAssignment`].
#[derive(Debug)]
pub struct PostingExecutor {
    publisher: Arc<dyn Publisher>,
}

impl PostingExecutor {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Executor for PostingExecutor {
    fn kind(&self) -> JobKind {
        JobKind::PostingAssignment
    }

    async fn run(
        &self,
        job: &Job,
        progress: &mut ProgressReporter,
    ) -> Result<(), JobExecutionError> {
        let assignment: PostAssignment = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobExecutionError::Permanent(format!("Invalid posting payload: {e}")))?;

        if assignment.status != PostStatus::Scheduled {
            return Err(JobExecutionError::Permanent(format!(
                "Assignment for '{}' on {} is {}, not scheduled",
                assignment.content_id, assignment.platform, assignment.status
            )));
        }

        tracing::info!(
            "Publishing '{}' to {} (scheduled for {})",
            assignment.content_id,
            assignment.platform,
            assignment.assigned_time
        );

        self.publisher
            .publish(&assignment)
            .await
            .map_err(classify_publish_error)?;

        progress.advance(progress.remaining()).await
    }
}

fn classify_publish_error(error: AppError) -> JobExecutionError {
    match error.kind {
        kind if kind.is_transient() => JobExecutionError::Transient(error.to_string()),
        ErrorKind::ResourceExhausted => JobExecutionError::ResourceExhausted(error.to_string()),
        _ => JobExecutionError::Permanent(error.to_string()),
    }
}

/// Publication status implied by the status of a posting job.
pub fn post_status(status: JobStatus) -> PostStatus {
    match status {
        JobStatus::Completed => PostStatus::Posted,
        JobStatus::Failed => PostStatus::Failed,
        JobStatus::Cancelled => PostStatus::Cancelled,
        JobStatus::Queued | JobStatus::Running | JobStatus::Paused => PostStatus::Scheduled,
    }
}
