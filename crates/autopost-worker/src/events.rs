//! Events published by the queue controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use autopost_core::types::id::JobId;
use autopost_entity::job::{Job, JobStatus};

use crate::controller::ControllerState;

/// A job changed status or made progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusChanged {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Job progress in 0..=100.
    pub progress: f64,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobStatusChanged {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress(),
            retry_count: job.retry_count,
            error_message: job.error_message.clone(),
            timestamp: job.updated_at,
        }
    }
}

/// Event broadcast to controller subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    JobStatusChanged(JobStatusChanged),
    /// Aggregate progress moved.
    BatchProgress {
        progress: f64,
        timestamp: DateTime<Utc>,
    },
    ControllerStateChanged {
        state: ControllerState,
        timestamp: DateTime<Utc>,
    },
}
