//! The controller actor: sole writer of queue and job state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing;

use autopost_core::config::{AppConfig, WorkerConfig};
use autopost_core::error::AppError;
use autopost_core::result::AppResult;
use autopost_core::types::id::JobId;
use autopost_entity::job::{Job, JobStatus};
use autopost_entity::request::BulkOperationRequest;

use crate::backpressure::{AdmissionGate, ResourceProbe};
use crate::events::{JobStatusChanged, QueueEvent};
use crate::executor::{ExecutorRegistry, Interruption};
use crate::pool::{RunOutcome, WorkerMessage, WorkerPool};
use crate::progress::ProgressAggregator;
use crate::queue::{JobQueue, PauseOutcome};
use crate::reporter::RunSignal;
use crate::retry::RetryPolicy;

use super::command::{Command, Reply};
use super::state::{ControllerState, QueueSnapshot};

enum Flow {
    Continue,
    Shutdown(Reply<()>),
}

pub(crate) struct ControllerActor {
    config: WorkerConfig,
    queue: JobQueue,
    pool: WorkerPool,
    aggregator: ProgressAggregator,
    gate: AdmissionGate,
    probe: Arc<dyn ResourceProbe>,
    state: ControllerState,
    /// Running jobs parked by a queue-wide pause, restored on resume.
    suspended: HashSet<JobId>,
    /// Running jobs individually asked to pause.
    held: HashSet<JobId>,
    cancelled_total: usize,
    batch_started: Option<Instant>,
    commands: mpsc::Receiver<Command>,
    ingress: mpsc::Receiver<WorkerMessage>,
    events: broadcast::Sender<QueueEvent>,
    progress_tx: watch::Sender<f64>,
    state_tx: watch::Sender<ControllerState>,
}

impl ControllerActor {
    pub(crate) fn new(
        config: &AppConfig,
        registry: Arc<ExecutorRegistry>,
        probe: Arc<dyn ResourceProbe>,
        commands: mpsc::Receiver<Command>,
        events: broadcast::Sender<QueueEvent>,
        progress_tx: watch::Sender<f64>,
        state_tx: watch::Sender<ControllerState>,
    ) -> Self {
        let (ingress_tx, ingress_rx) = mpsc::channel(config.worker.ingress_capacity);
        let pool = WorkerPool::new(
            config.worker.max_workers,
            registry,
            Arc::new(RetryPolicy::from_config(&config.retry)),
            ingress_tx,
        );

        Self {
            config: config.worker.clone(),
            queue: JobQueue::new(config.worker.max_queued_jobs),
            pool,
            aggregator: ProgressAggregator::new(config.worker.exclude_failed_from_progress),
            gate: AdmissionGate::new(&config.backpressure),
            probe,
            state: ControllerState::Idle,
            suspended: HashSet::new(),
            held: HashSet::new(),
            cancelled_total: 0,
            batch_started: None,
            commands,
            ingress: ingress_rx,
            events,
            progress_tx,
            state_tx,
        }
    }

    pub(crate) async fn run(mut self) -> AppResult<()> {
        tracing::info!(
            "Queue controller started with max_workers={}, tick={:?}, max_queued_jobs={}",
            self.config.max_workers,
            self.config.tick_interval(),
            self.config.max_queued_jobs
        );

        let mut ticker = time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        tracing::info!("All controller handles dropped");
                        break;
                    }
                },
                Some(message) = self.ingress.recv() => {
                    self.handle_worker_message(message).map(|()| Flow::Continue)
                }
                _ = ticker.tick() => self.on_tick().map(|()| Flow::Continue),
                _ = sleep_until_due(self.queue.next_due()), if self.state == ControllerState::Running => {
                    Ok(Flow::Continue)
                }
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Shutdown(reply)) => {
                    self.shutdown().await;
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }
                Err(e) => return Err(self.fault(e)),
            }

            if let Err(e) = self.dispatch() {
                return Err(self.fault(e));
            }
            self.refresh_state();
        }

        self.shutdown().await;
        Ok(())
    }

    // ── Commands ──────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) -> AppResult<Flow> {
        match command {
            Command::Submit(request, reply) => {
                let result = self.submit(*request);
                respond(reply, result)?;
            }
            Command::Start(reply) => {
                let result = self.start();
                respond(reply, result)?;
            }
            Command::Pause(reply) => {
                let result = self.pause();
                respond(reply, result)?;
            }
            Command::Resume(reply) => {
                let result = self.resume();
                respond(reply, result)?;
            }
            Command::Stop(reply) => {
                let result = self.stop();
                respond(reply, result)?;
            }
            Command::CancelJob(id, reply) => {
                let result = self.cancel_job(id);
                respond(reply, result)?;
            }
            Command::PauseJob(id, reply) => {
                let result = self.pause_job(id);
                respond(reply, result)?;
            }
            Command::ResumeJob(id, reply) => {
                let result = self.resume_job(id);
                respond(reply, result)?;
            }
            Command::RetryJob(id, reply) => {
                let result = self.retry_job(id);
                respond(reply, result)?;
            }
            Command::RetryFailed(reply) => {
                let result = self.retry_failed();
                respond(reply, result)?;
            }
            Command::List(filter, reply) => {
                let _ = reply.send(Ok(self.queue.list(&filter)));
            }
            Command::Get(id, reply) => {
                let result = self
                    .queue
                    .get(id)
                    .cloned()
                    .ok_or_else(|| AppError::not_found(format!("Job {id} not found")));
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            Command::ClearFinished(reply) => {
                let removed = self.clear_finished();
                let _ = reply.send(Ok(removed));
            }
            Command::Shutdown(reply) => return Ok(Flow::Shutdown(reply)),
        }
        Ok(Flow::Continue)
    }

    fn submit(&mut self, request: BulkOperationRequest) -> AppResult<Vec<JobId>> {
        request.check()?;

        let jobs = request.expand(self.config.default_max_retries);
        if jobs.len() > self.queue.remaining_capacity() {
            return Err(AppError::queue_full(format!(
                "Operation {} needs {} slots but only {} remain",
                request.operation_id,
                jobs.len(),
                self.queue.remaining_capacity()
            )));
        }

        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            let id = job.id;
            self.queue.enqueue(job)?;
            self.emit(id);
            ids.push(id);
        }

        tracing::info!(
            "Accepted operation {}: {} '{}' jobs at {} priority",
            request.operation_id,
            ids.len(),
            request.category,
            request.priority.as_str()
        );

        if self.state == ControllerState::Completed {
            self.begin_batch();
        }
        Ok(ids)
    }

    fn start(&mut self) -> AppResult<()> {
        match self.state {
            ControllerState::Idle | ControllerState::Completed => {
                self.begin_batch();
                Ok(())
            }
            ControllerState::Paused => self.resume(),
            ControllerState::Running => Ok(()),
            ControllerState::Faulted => Err(AppError::service_unavailable(
                "Queue controller has faulted",
            )),
        }
    }

    fn pause(&mut self) -> AppResult<()> {
        match self.state {
            ControllerState::Running => {
                for id in self.pool.active_ids() {
                    self.pool.signal(id, RunSignal::Pause);
                    self.suspended.insert(id);
                }
                self.set_state(ControllerState::Paused);
                Ok(())
            }
            ControllerState::Paused => Ok(()),
            other => Err(AppError::conflict(format!(
                "Cannot pause a {other} queue"
            ))),
        }
    }

    fn resume(&mut self) -> AppResult<()> {
        match self.state {
            ControllerState::Paused => {
                let now = Utc::now();
                let suspended: Vec<JobId> = self.suspended.drain().collect();
                for id in suspended {
                    if self.held.contains(&id) {
                        continue;
                    }
                    match self.queue.get(id).map(|j| j.status) {
                        Some(JobStatus::Paused) => {
                            self.queue.resume(id, now)?;
                            self.emit(id);
                        }
                        Some(JobStatus::Running) => {
                            self.pool.signal(id, RunSignal::Continue);
                        }
                        _ => {}
                    }
                }
                self.set_state(ControllerState::Running);
                Ok(())
            }
            ControllerState::Running => Ok(()),
            other => Err(AppError::conflict(format!(
                "Cannot resume a {other} queue"
            ))),
        }
    }

    fn stop(&mut self) -> AppResult<()> {
        let now = Utc::now();

        for id in self.pool.detach_all(RunSignal::Stop) {
            let keep_paused = self.held.contains(&id);
            let Some(job) = self.queue.get_mut(id) else {
                continue;
            };
            if job.status != JobStatus::Running {
                continue;
            }
            if keep_paused {
                job.transition(JobStatus::Paused, now)?;
            } else {
                job.transition(JobStatus::Queued, now)?;
                self.queue.requeue(id)?;
            }
            self.emit(id);
        }

        let suspended: Vec<JobId> = self.suspended.drain().collect();
        for id in suspended {
            if !self.held.contains(&id)
                && self.queue.get(id).map(|j| j.status) == Some(JobStatus::Paused)
            {
                self.queue.resume(id, now)?;
                self.emit(id);
            }
        }
        self.held.clear();

        self.set_state(ControllerState::Idle);
        Ok(())
    }

    fn cancel_job(&mut self, id: JobId) -> AppResult<Job> {
        let job = self.queue.cancel(id, Utc::now())?;

        if self.pool.detach(id, RunSignal::Cancel) {
            tracing::info!("Job {} cancelled; its worker stops at the next step", id);
        } else {
            tracing::info!("Job {} cancelled", id);
        }

        self.suspended.remove(&id);
        self.held.remove(&id);
        self.cancelled_total += 1;
        self.record(&job);
        Ok(job)
    }

    fn pause_job(&mut self, id: JobId) -> AppResult<()> {
        match self.queue.pause(id, Utc::now())? {
            PauseOutcome::Paused => {
                tracing::info!("Job {} paused", id);
                self.emit(id);
            }
            PauseOutcome::AtNextStep => {
                tracing::info!("Job {} pauses at its next step", id);
                self.pool.signal(id, RunSignal::Pause);
                self.held.insert(id);
            }
            PauseOutcome::AlreadyPaused => {}
        }
        self.suspended.remove(&id);
        Ok(())
    }

    fn resume_job(&mut self, id: JobId) -> AppResult<()> {
        let status = self
            .queue
            .get(id)
            .map(|j| j.status)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;

        match status {
            JobStatus::Paused => {
                self.queue.resume(id, Utc::now())?;
                self.emit(id);
                if self.state == ControllerState::Completed {
                    self.begin_batch();
                }
            }
            JobStatus::Running if self.held.contains(&id) => {
                if self.state != ControllerState::Paused {
                    self.pool.signal(id, RunSignal::Continue);
                } else {
                    self.suspended.insert(id);
                }
            }
            other => {
                return Err(AppError::conflict(format!(
                    "Job {id} is {other} and not paused"
                )));
            }
        }

        self.held.remove(&id);
        tracing::info!("Job {} resumed", id);
        Ok(())
    }

    fn retry_job(&mut self, id: JobId) -> AppResult<()> {
        let job = self
            .queue
            .get_mut(id)
            .ok_or_else(|| AppError::not_found(format!("Job {id} not found")))?;
        if job.status != JobStatus::Failed {
            return Err(AppError::conflict(format!(
                "Job {} is {} and cannot be retried",
                id, job.status
            )));
        }

        job.reset_retries();
        job.transition(JobStatus::Queued, Utc::now())?;
        self.queue.requeue(id)?;
        tracing::info!("Job {} manually retried", id);
        self.emit(id);

        if self.state == ControllerState::Completed {
            self.begin_batch();
        }
        Ok(())
    }

    fn retry_failed(&mut self) -> AppResult<usize> {
        let now = Utc::now();
        let mut requeued = 0;

        for id in self.queue.ids_with_status(JobStatus::Failed) {
            let Some(job) = self.queue.get_mut(id) else {
                continue;
            };
            if !job.can_retry() {
                continue;
            }
            job.transition(JobStatus::Queued, now)?;
            self.queue.requeue(id)?;
            self.emit(id);
            requeued += 1;
        }

        tracing::info!("Requeued {} failed jobs", requeued);
        if requeued > 0 && self.state == ControllerState::Completed {
            self.begin_batch();
        }
        Ok(requeued)
    }

    fn clear_finished(&mut self) -> usize {
        let removed = self.queue.clear_finished();
        for id in &removed {
            self.aggregator.forget(*id);
        }
        self.publish_progress();
        tracing::info!("Cleared {} finished jobs", removed.len());
        removed.len()
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.state,
            stats: self.queue.stats(),
            progress: self.aggregator.overall(),
            in_flight: self.pool.in_flight(),
            max_workers: self.pool.max_workers(),
            backpressure_engaged: self.gate.is_engaged(Instant::now()),
        }
    }

    // ── Worker results ────────────────────────────────────────────

    fn handle_worker_message(&mut self, message: WorkerMessage) -> AppResult<()> {
        match message {
            WorkerMessage::Progress {
                job_id,
                token,
                processed,
            } => {
                if !self.pool.owns(job_id, token) {
                    tracing::trace!("Dropping progress from a detached run of job {}", job_id);
                    return Ok(());
                }
                let job = self.running_job(job_id)?;
                if job.record_progress(processed, Utc::now())? {
                    tracing::debug!(
                        "Job {} progress {}/{}",
                        job_id,
                        processed,
                        job.item_count
                    );
                    self.emit(job_id);
                }
                Ok(())
            }
            WorkerMessage::Finished {
                job_id,
                token,
                outcome,
            } => {
                if !self.pool.finish(job_id, token) {
                    tracing::debug!("Detached run of job {} ended: {:?}", job_id, outcome);
                    return Ok(());
                }
                self.apply_outcome(job_id, outcome)
            }
        }
    }

    fn apply_outcome(&mut self, id: JobId, outcome: RunOutcome) -> AppResult<()> {
        let now = Utc::now();
        let paused_queue = self.state == ControllerState::Paused;
        let job = self.running_job(id)?;

        match outcome {
            RunOutcome::Completed => {
                job.complete(now)?;
                tracing::info!("Job {} completed successfully", id);
            }
            RunOutcome::Failed { error } => {
                job.fail(error, now)?;
            }
            RunOutcome::Retry { delay, error } => {
                job.requeue_for_retry(now)?;
                tracing::debug!("Job {} requeued after error: {}", id, error);
                self.queue.defer(id, Instant::now() + delay)?;
            }
            RunOutcome::Deferred { error } => {
                job.transition(JobStatus::Queued, now)?;
                tracing::debug!("Job {} requeued after resource error: {}", id, error);
                let until = self.gate.engage_cooldown(Instant::now());
                self.queue.defer(id, until)?;
            }
            RunOutcome::Interrupted(Interruption::Paused) => {
                job.transition(JobStatus::Paused, now)?;
                let parked = self.held.remove(&id)
                    || (paused_queue && self.suspended.contains(&id));
                if !parked {
                    // The pause was withdrawn before the run saw it.
                    self.suspended.remove(&id);
                    self.queue.resume(id, now)?;
                }
            }
            RunOutcome::Interrupted(Interruption::Cancelled) => {
                let job = self.queue.cancel(id, now)?;
                self.cancelled_total += 1;
                self.suspended.remove(&id);
                self.held.remove(&id);
                self.record(&job);
                return Ok(());
            }
            RunOutcome::Interrupted(Interruption::Stopped) => {
                job.transition(JobStatus::Queued, now)?;
                self.queue.requeue(id)?;
            }
        }

        self.emit(id);
        if self
            .queue
            .get(id)
            .is_some_and(|j| j.status.is_terminal())
        {
            self.log_batch_progress();
        }
        Ok(())
    }

    fn running_job(&mut self, id: JobId) -> AppResult<&mut Job> {
        let job = self.queue.get_mut(id).ok_or_else(|| {
            AppError::invalid_state(format!("Worker reported on unknown job {id}"))
        })?;
        if job.status != JobStatus::Running {
            return Err(AppError::invalid_state(format!(
                "Worker reported on job {} which is {}",
                id, job.status
            )));
        }
        Ok(job)
    }

    // ── Housekeeping ──────────────────────────────────────────────

    fn on_tick(&mut self) -> AppResult<()> {
        let now = Instant::now();
        for id in self.pool.stalled(now, self.config.stall_multiplier) {
            self.pool.abort(id);
            self.suspended.remove(&id);
            self.held.remove(&id);

            let message = format!(
                "Stalled: exceeded {}x its estimated duration",
                self.config.stall_multiplier
            );
            let job = self.running_job(id)?;
            tracing::error!("Job {} force-failed: {}", id, message);
            job.fail(message, Utc::now())?;
            self.emit(id);
        }
        Ok(())
    }

    fn dispatch(&mut self) -> AppResult<()> {
        if self.state != ControllerState::Running {
            return Ok(());
        }

        let now = Instant::now();
        self.queue.promote_due(now);

        let mut winding_down = Vec::new();
        while self.pool.has_capacity() && self.queue.has_ready() {
            if !self.gate.admit(self.probe.usage(), now) {
                break;
            }
            let Some(id) = self.queue.dequeue_next() else {
                break;
            };
            if self.pool.holds_slot(id) {
                winding_down.push(id);
                continue;
            }
            let job = self.queue.get_mut(id).ok_or_else(|| {
                AppError::invalid_state(format!("Dequeued job {id} has no record"))
            })?;
            job.start(Utc::now())?;
            let run = job.clone();
            self.pool.spawn(run)?;
            self.emit(id);
        }

        // Retried once the previous run reports back.
        for id in winding_down {
            tracing::debug!("Job {} waits for its previous run to stop", id);
            self.queue.requeue(id)?;
        }

        let running = self.queue.count(JobStatus::Running);
        if running > self.pool.max_workers() {
            return Err(AppError::invalid_state(format!(
                "{} jobs running with only {} workers",
                running,
                self.pool.max_workers()
            )));
        }
        Ok(())
    }

    fn refresh_state(&mut self) {
        if self.state != ControllerState::Running
            || !self.queue.is_drained()
            || self.pool.active_count() > 0
        {
            return;
        }

        let stats = self.queue.stats();
        let elapsed = self.batch_started.take().map(|t| t.elapsed());
        tracing::info!(
            "Queue drained in {:?}: {} completed, {} failed, {} cancelled, {} paused",
            elapsed.unwrap_or_default(),
            stats.completed,
            stats.failed,
            self.cancelled_total,
            stats.paused
        );
        self.set_state(ControllerState::Completed);
    }

    async fn shutdown(&mut self) {
        tracing::info!("Queue controller shutting down");

        if self.state != ControllerState::Idle && self.state != ControllerState::Faulted {
            if let Err(e) = self.stop() {
                tracing::warn!("Failed to requeue in-flight jobs on shutdown: {}", e);
            }
        }

        let drain = self.pool.drain(self.config.shutdown_grace());
        tokio::pin!(drain);
        let drained = loop {
            tokio::select! {
                done = &mut drain => break done,
                // Keep the ingress moving so winding-down runs can report.
                Some(_) = self.ingress.recv() => {}
            }
        };

        if !drained {
            tracing::warn!(
                "Shutdown grace of {:?} elapsed with jobs still in flight",
                self.config.shutdown_grace()
            );
        }
        tracing::info!("Queue controller shut down complete");
    }

    fn fault(&mut self, error: AppError) -> AppError {
        tracing::error!("Queue controller halted on corrupted state: {}", error);
        self.pool.detach_all(RunSignal::Stop);
        self.set_state(ControllerState::Faulted);
        error
    }

    // ── Publication ───────────────────────────────────────────────

    fn begin_batch(&mut self) {
        self.batch_started = Some(Instant::now());
        self.set_state(ControllerState::Running);
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state == state {
            return;
        }
        tracing::info!("Queue controller {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        let _ = self.events.send(QueueEvent::ControllerStateChanged {
            state,
            timestamp: Utc::now(),
        });
    }

    /// Publish the current record of a job still in the queue.
    fn emit(&mut self, id: JobId) {
        if let Some(job) = self.queue.get(id) {
            let event = JobStatusChanged::from_job(job);
            self.aggregator.observe(job);
            let _ = self.events.send(QueueEvent::JobStatusChanged(event));
            self.publish_progress();
        }
    }

    /// Publish the final record of a job that has left the queue.
    fn record(&mut self, job: &Job) {
        self.aggregator.observe(job);
        let _ = self
            .events
            .send(QueueEvent::JobStatusChanged(JobStatusChanged::from_job(job)));
        self.publish_progress();
    }

    fn publish_progress(&mut self) {
        let progress = self.aggregator.overall();
        let changed = self.progress_tx.send_if_modified(|current| {
            if (*current - progress).abs() > f64::EPSILON {
                *current = progress;
                true
            } else {
                false
            }
        });
        if changed {
            let _ = self.events.send(QueueEvent::BatchProgress {
                progress,
                timestamp: Utc::now(),
            });
        }
    }

    fn log_batch_progress(&self) {
        let stats = self.queue.stats();
        tracing::info!(
            "Batch progress: {}/{} jobs finished ({:.1}%)",
            stats.completed + stats.failed,
            stats.total,
            self.aggregator.overall()
        );
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn respond<T>(reply: Reply<T>, result: AppResult<T>) -> AppResult<()> {
    let fatal = match &result {
        Err(e) if e.is_fatal() => Some(e.clone()),
        _ => None,
    };
    let _ = reply.send(result);
    fatal.map_or(Ok(()), Err)
}
