//! Step-boundary progress reporting for executors.

use tokio::sync::{mpsc, watch};

use autopost_core::types::id::JobId;

use crate::executor::{Interruption, JobExecutionError};
use crate::pool::{RunToken, WorkerMessage};

/// Control signal the controller sends to a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    /// Keep going.
    Continue,
    /// Stop at the next step boundary and park the job.
    Pause,
    /// Stop at the next step boundary; the job is gone.
    Cancel,
    /// Stop at the next step boundary; the controller is stopping.
    Stop,
}

impl RunSignal {
    fn interruption(self) -> Option<Interruption> {
        match self {
            Self::Continue => None,
            Self::Pause => Some(Interruption::Paused),
            Self::Cancel => Some(Interruption::Cancelled),
            Self::Stop => Some(Interruption::Stopped),
        }
    }
}

/// Handed to an executor for the length of one run.
///
/// Every call to [`advance`](Self::advance) forwards the new processed count
/// to the controller and then checks for a pending pause, cancel or stop.
#[derive(Debug)]
pub struct ProgressReporter {
    job_id: JobId,
    token: RunToken,
    item_count: u32,
    processed: u32,
    ingress: mpsc::Sender<WorkerMessage>,
    signal: watch::Receiver<RunSignal>,
}

impl ProgressReporter {
    /// Create a reporter starting at `processed` items.
    pub fn new(
        job_id: JobId,
        token: RunToken,
        item_count: u32,
        processed: u32,
        ingress: mpsc::Sender<WorkerMessage>,
        signal: watch::Receiver<RunSignal>,
    ) -> Self {
        Self {
            job_id,
            token,
            item_count,
            processed: processed.min(item_count),
            ingress,
            signal,
        }
    }

    /// The job being run.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Total work items in the job.
    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    /// Items already processed, including those from before a pause.
    pub fn processed(&self) -> u32 {
        self.processed
    }

    /// Items still to process.
    pub fn remaining(&self) -> u32 {
        self.item_count - self.processed
    }

    /// Fail with [`JobExecutionError::Interrupted`] if the run was asked to
    /// stop.
    pub fn checkpoint(&self) -> Result<(), JobExecutionError> {
        match self.signal.borrow().interruption() {
            Some(reason) => Err(JobExecutionError::Interrupted(reason)),
            None => Ok(()),
        }
    }

    /// Record `items` more processed items, then check for a stop request.
    ///
    /// The count is clamped to the job's item count.
    pub async fn advance(&mut self, items: u32) -> Result<(), JobExecutionError> {
        let next = self.processed.saturating_add(items).min(self.item_count);

        if next > self.processed {
            self.processed = next;
            let message = WorkerMessage::Progress {
                job_id: self.job_id,
                token: self.token,
                processed: next,
            };
            if self.ingress.send(message).await.is_err() {
                // Controller is gone; nothing left to report to.
                return Err(JobExecutionError::Interrupted(Interruption::Stopped));
            }
        }

        self.checkpoint()
    }
}
