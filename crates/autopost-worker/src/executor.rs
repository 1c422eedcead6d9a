//! Executor contract and registry. Dispatches jobs to the executor
//! registered for their kind.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing;

use autopost_core::error::AppError;
use autopost_entity::job::{Job, JobKind};

use crate::reporter::ProgressReporter;

/// Performs the actual work for one job kind.
///
/// Implementations should call [`ProgressReporter::advance`] after every
/// unit of work and stop as soon as it returns an error; that is where
/// pause, cancel and stop requests take effect. A job resumed after a pause
/// starts with `progress.processed()` items already done.
#[async_trait]
pub trait Executor: Send + Sync + fmt::Debug {
    /// The job kind this executor handles.
    fn kind(&self) -> JobKind;

    /// Run the job to completion.
    async fn run(&self, job: &Job, progress: &mut ProgressReporter)
    -> Result<(), JobExecutionError>;
}

/// Why a run stopped before finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// The job or the whole queue was paused.
    Paused,
    /// The job was cancelled.
    Cancelled,
    /// The controller was stopped or shut down.
    Stopped,
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => write!(f, "paused"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Error from job execution
#[derive(Debug, thiserror::Error)]
pub enum JobExecutionError {
    /// Transient failure (rate limiting, network); may retry
    #[error("Transient job failure: {0}")]
    Transient(String),

    /// Permanent failure (invalid content, quota exhausted); do not retry
    #[error("Permanent job failure: {0}")]
    Permanent(String),

    /// System-wide resource exhaustion; back off admission, do not fail
    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    /// Run stopped at a step boundary on request
    #[error("Job interrupted: {0}")]
    Interrupted(Interruption),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] AppError),
}

/// Dispatches jobs to the appropriate executor based on their kind
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    /// Registered executors by kind
    executors: HashMap<JobKind, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the same kind
    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let kind = executor.kind();
        tracing::info!("Registered executor for job kind '{}'", kind);
        self.executors.insert(kind, executor);
    }

    /// Run a job through its executor
    pub async fn execute(
        &self,
        job: &Job,
        progress: &mut ProgressReporter,
    ) -> Result<(), JobExecutionError> {
        let executor = self.executors.get(&job.kind).ok_or_else(|| {
            JobExecutionError::Permanent(format!(
                "No executor registered for job kind '{}'",
                job.kind
            ))
        })?;

        tracing::debug!(
            "Executing job: id={}, kind='{}', attempt={}/{}",
            job.id,
            job.kind,
            job.retry_count + 1,
            job.max_retries + 1
        );

        executor.run(job, progress).await
    }
}
