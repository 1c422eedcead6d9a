//! Worker pool: runs jobs on spawned tasks behind a semaphore and reports
//! results back to the controller over the ingress channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing;

use autopost_core::error::AppError;
use autopost_core::types::id::JobId;
use autopost_entity::job::Job;

use crate::executor::{ExecutorRegistry, Interruption, JobExecutionError};
use crate::reporter::{ProgressReporter, RunSignal};
use crate::retry::{RetryDecision, RetryPolicy};

/// Identifies one run of a job. Messages carrying a stale token are from a
/// run the controller already let go of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunToken(u64);

impl RunToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

/// Message from a worker task to the controller.
#[derive(Debug)]
pub enum WorkerMessage {
    /// The run has processed `processed` items so far.
    Progress {
        job_id: JobId,
        token: RunToken,
        processed: u32,
    },
    /// The run is over. The worker slot is already free.
    Finished {
        job_id: JobId,
        token: RunToken,
        outcome: RunOutcome,
    },
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// Transient failure with retries left.
    Retry { delay: Duration, error: String },
    /// Permanent failure, or transient with no retries left.
    Failed { error: String },
    /// Resource exhaustion; requeue without consuming a retry.
    Deferred { error: String },
    /// Stopped at a step boundary on request.
    Interrupted(Interruption),
}

#[derive(Debug)]
struct ActiveRun {
    token: RunToken,
    signal: watch::Sender<RunSignal>,
    started: Instant,
    estimated: Option<Duration>,
    task: JoinHandle<()>,
}

/// Bounded set of running jobs.
///
/// A slot is held from [`spawn`](Self::spawn) until the task finishes, even
/// if the controller detaches the run first, so the number of executing
/// tasks never exceeds `max_workers`.
#[derive(Debug)]
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    registry: Arc<ExecutorRegistry>,
    policy: Arc<RetryPolicy>,
    ingress: mpsc::Sender<WorkerMessage>,
    active: HashMap<JobId, ActiveRun>,
    /// Runs let go of by the controller whose tasks have not reported back.
    detached: HashMap<JobId, RunToken>,
    next_token: u64,
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots.
    pub fn new(
        max_workers: usize,
        registry: Arc<ExecutorRegistry>,
        policy: Arc<RetryPolicy>,
        ingress: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            registry,
            policy,
            ingress,
            active: HashMap::new(),
            detached: HashMap::new(),
            next_token: 0,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Check if a worker slot is free.
    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    /// Slots currently held, including by detached runs still winding down.
    pub fn in_flight(&self) -> usize {
        self.max_workers - self.semaphore.available_permits()
    }

    /// Runs the controller still tracks.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Ids of tracked runs.
    pub fn active_ids(&self) -> Vec<JobId> {
        self.active.keys().copied().collect()
    }

    /// Check if a run of `id`, tracked or detached, still occupies a slot.
    pub fn holds_slot(&self, id: JobId) -> bool {
        self.active.contains_key(&id) || self.detached.contains_key(&id)
    }

    /// Check that a message belongs to the current run of `id`.
    pub fn owns(&self, id: JobId, token: RunToken) -> bool {
        self.active.get(&id).is_some_and(|run| run.token == token)
    }

    /// Start a run of `job`. The job must already be marked running.
    pub fn spawn(&mut self, job: Job) -> Result<RunToken, AppError> {
        if self.holds_slot(job.id) {
            return Err(AppError::invalid_state(format!(
                "Job {} already has a run in flight",
                job.id
            )));
        }

        let permit = self.semaphore.clone().try_acquire_owned().map_err(|_| {
            AppError::invalid_state(format!(
                "No free worker slot for job {} ({} in flight)",
                job.id,
                self.in_flight()
            ))
        })?;

        self.next_token += 1;
        let token = RunToken(self.next_token);
        let (signal_tx, signal_rx) = watch::channel(RunSignal::Continue);

        let job_id = job.id;
        let estimated = job.estimated_duration();
        let reporter = ProgressReporter::new(
            job_id,
            token,
            job.item_count,
            job.processed_count,
            self.ingress.clone(),
            signal_rx,
        );

        let registry = Arc::clone(&self.registry);
        let policy = Arc::clone(&self.policy);
        let ingress = self.ingress.clone();

        let task = tokio::spawn(async move {
            tracing::info!(
                "Processing job: id={}, kind='{}', attempt={}/{}",
                job_id,
                job.kind,
                job.retry_count + 1,
                job.max_retries + 1
            );

            let outcome = run_job(&registry, &policy, &job, reporter).await;
            drop(permit);

            let message = WorkerMessage::Finished {
                job_id,
                token,
                outcome,
            };
            if ingress.send(message).await.is_err() {
                tracing::debug!("Controller gone before job {} reported its outcome", job_id);
            }
        });

        self.active.insert(
            job_id,
            ActiveRun {
                token,
                signal: signal_tx,
                started: Instant::now(),
                estimated,
                task,
            },
        );

        Ok(token)
    }

    /// Send a control signal to a tracked run.
    pub fn signal(&self, id: JobId, signal: RunSignal) -> bool {
        match self.active.get(&id) {
            Some(run) => {
                run.signal.send_replace(signal);
                true
            }
            None => false,
        }
    }

    /// Signal a run and stop tracking it. Its task keeps its slot until it
    /// reaches the next step boundary.
    pub fn detach(&mut self, id: JobId, signal: RunSignal) -> bool {
        match self.active.remove(&id) {
            Some(run) => {
                run.signal.send_replace(signal);
                self.detached.insert(id, run.token);
                true
            }
            None => false,
        }
    }

    /// Detach every tracked run. Returns their job ids.
    pub fn detach_all(&mut self, signal: RunSignal) -> Vec<JobId> {
        let ids = self.active_ids();
        for id in &ids {
            self.detach(*id, signal);
        }
        ids
    }

    /// Stop tracking a run that reported its outcome. Returns `false` for a
    /// detached run, whose outcome the controller ignores.
    pub fn finish(&mut self, id: JobId, token: RunToken) -> bool {
        if self.owns(id, token) {
            self.active.remove(&id);
            return true;
        }
        if self.detached.get(&id) == Some(&token) {
            self.detached.remove(&id);
        }
        false
    }

    /// Kill a run outright. Its slot is released when the task unwinds.
    pub fn abort(&mut self, id: JobId) -> bool {
        match self.active.remove(&id) {
            Some(run) => {
                run.task.abort();
                true
            }
            None => false,
        }
    }

    /// Runs that have exceeded `multiplier` times their estimated duration.
    pub fn stalled(&self, now: Instant, multiplier: f64) -> Vec<JobId> {
        self.active
            .iter()
            .filter_map(|(id, run)| {
                let limit = run.estimated?.mul_f64(multiplier);
                (now.saturating_duration_since(run.started) > limit).then_some(*id)
            })
            .collect()
    }

    /// Wait for every slot to be released, up to `grace`.
    ///
    /// Returns `false` if some tasks were still running when time ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        tracing::info!(
            "Waiting for {} in-flight jobs to reach a step boundary...",
            self.in_flight()
        );

        let max_permits = self.max_workers as u32;
        matches!(
            time::timeout(grace, self.semaphore.acquire_many(max_permits)).await,
            Ok(Ok(_))
        )
    }
}

async fn run_job(
    registry: &ExecutorRegistry,
    policy: &RetryPolicy,
    job: &Job,
    mut reporter: ProgressReporter,
) -> RunOutcome {
    let result = match reporter.checkpoint() {
        Ok(()) => registry.execute(job, &mut reporter).await,
        Err(e) => Err(e),
    };

    let error = match result {
        Ok(()) => return RunOutcome::Completed,
        Err(JobExecutionError::Interrupted(reason)) => {
            tracing::info!(
                "Job {} {} after {}/{} items",
                job.id,
                reason,
                reporter.processed(),
                reporter.item_count()
            );
            return RunOutcome::Interrupted(reason);
        }
        Err(e) => e,
    };

    match policy.decide(job, &error) {
        RetryDecision::Retry { attempt, delay } => {
            tracing::warn!(
                "Job {} failed (transient), retry {}/{} in {:?}: {}",
                job.id,
                attempt,
                job.max_retries,
                delay,
                error
            );
            RunOutcome::Retry {
                delay,
                error: error.to_string(),
            }
        }
        RetryDecision::Defer => {
            tracing::warn!("Job {} deferred: {}", job.id, error);
            RunOutcome::Deferred {
                error: error.to_string(),
            }
        }
        RetryDecision::Fail => {
            tracing::error!(
                "Job {} failed after {} retries: {}",
                job.id,
                job.retry_count,
                error
            );
            RunOutcome::Failed {
                error: error.to_string(),
            }
        }
    }
}
