//! Batch progress aggregation across tracked jobs.

use std::collections::HashMap;

use autopost_core::types::id::JobId;
use autopost_entity::job::{Job, JobStatus};

/// Mean progress over every tracked job.
///
/// Completed jobs count as 100. Failed jobs count as 0, or drop out of the
/// denominator when `exclude_failed` is set. Cancelled jobs are forgotten.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    exclude_failed: bool,
    /// `None` marks a tracked job that is excluded from the mean.
    tracked: HashMap<JobId, Option<f64>>,
}

impl ProgressAggregator {
    pub fn new(exclude_failed: bool) -> Self {
        Self {
            exclude_failed,
            tracked: HashMap::new(),
        }
    }

    /// Record the latest state of a job.
    pub fn observe(&mut self, job: &Job) {
        let contribution = match job.status {
            JobStatus::Cancelled => {
                self.tracked.remove(&job.id);
                return;
            }
            JobStatus::Completed => Some(100.0),
            JobStatus::Failed if self.exclude_failed => None,
            JobStatus::Failed => Some(0.0),
            _ => Some(job.progress()),
        };
        self.tracked.insert(job.id, contribution);
    }

    pub fn forget(&mut self, id: JobId) {
        self.tracked.remove(&id);
    }

    /// Overall progress in 0..=100; 0 when nothing counts.
    pub fn overall(&self) -> f64 {
        let (sum, count) = self
            .tracked
            .values()
            .flatten()
            .fold((0.0, 0usize), |(sum, count), p| (sum + p, count + 1));

        if count == 0 { 0.0 } else { sum / count as f64 }
    }

    pub fn tracked(&self) -> usize {
        self.tracked.len()
    }
}
