//! Queue controller.
//!
//! A single actor task owns the job queue, the worker pool and every job
//! record. [`QueueController`] is a cheap cloneable handle that talks to the
//! actor over a command channel with one-shot replies. Status changes are
//! published on a broadcast channel; aggregate progress and controller state
//! are also available through watch channels.

mod actor;
mod command;
mod state;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use autopost_core::config::AppConfig;
use autopost_core::error::AppError;
use autopost_core::result::AppResult;
use autopost_core::types::id::JobId;
use autopost_entity::job::{Job, JobFilter};
use autopost_entity::request::BulkOperationRequest;

use crate::backpressure::{ResourceProbe, SharedUsage};
use crate::events::QueueEvent;
use crate::executor::{Executor, ExecutorRegistry};

use self::actor::ControllerActor;
use self::command::{Command, Reply};

pub use self::state::{ControllerState, QueueSnapshot};

const COMMAND_BUFFER: usize = 64;

/// Handle to a running queue controller.
#[derive(Debug, Clone)]
pub struct QueueController {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<QueueEvent>,
    progress: watch::Receiver<f64>,
    state: watch::Receiver<ControllerState>,
}

impl QueueController {
    /// Start building a controller from configuration.
    pub fn builder(config: &AppConfig) -> QueueControllerBuilder {
        QueueControllerBuilder::new(config)
    }

    /// Submit a bulk operation. Returns the ids of the created jobs, in
    /// target order.
    pub async fn submit(&self, request: BulkOperationRequest) -> AppResult<Vec<JobId>> {
        self.request(|reply| Command::Submit(Box::new(request), reply))
            .await
    }

    /// Begin dispatching queued jobs.
    pub async fn start(&self) -> AppResult<()> {
        self.request(Command::Start).await
    }

    /// Stop admitting jobs; running jobs park at their next step boundary.
    pub async fn pause(&self) -> AppResult<()> {
        self.request(Command::Pause).await
    }

    /// Undo [`pause`](Self::pause).
    pub async fn resume(&self) -> AppResult<()> {
        self.request(Command::Resume).await
    }

    /// Return to idle. Running jobs go back to the queue.
    pub async fn stop(&self) -> AppResult<()> {
        self.request(Command::Stop).await
    }

    /// Cancel a job in any non-terminal state and drop it from the queue.
    pub async fn cancel_job(&self, id: JobId) -> AppResult<Job> {
        self.request(|reply| Command::CancelJob(id, reply)).await
    }

    pub async fn pause_job(&self, id: JobId) -> AppResult<()> {
        self.request(|reply| Command::PauseJob(id, reply)).await
    }

    pub async fn resume_job(&self, id: JobId) -> AppResult<()> {
        self.request(|reply| Command::ResumeJob(id, reply)).await
    }

    /// Manually retry one failed job with a fresh retry budget.
    pub async fn retry_job(&self, id: JobId) -> AppResult<()> {
        self.request(|reply| Command::RetryJob(id, reply)).await
    }

    /// Requeue every failed job that still has retries left. Returns how
    /// many were requeued.
    pub async fn retry_failed(&self) -> AppResult<usize> {
        self.request(Command::RetryFailed).await
    }

    /// Jobs matching `filter`, in submission order.
    pub async fn list(&self, filter: JobFilter) -> AppResult<Vec<Job>> {
        self.request(|reply| Command::List(filter, reply)).await
    }

    pub async fn get(&self, id: JobId) -> AppResult<Job> {
        self.request(|reply| Command::Get(id, reply)).await
    }

    pub async fn snapshot(&self) -> AppResult<QueueSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Drop completed and failed jobs. Returns how many were removed.
    pub async fn clear_finished(&self) -> AppResult<usize> {
        self.request(Command::ClearFinished).await
    }

    /// Stop the controller, waiting up to the configured grace period for
    /// in-flight jobs to reach a step boundary.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(Command::Shutdown).await
    }

    /// Subscribe to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Latest aggregate progress in 0..=100.
    pub fn progress(&self) -> f64 {
        *self.progress.borrow()
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    pub fn watch_progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// Wait until the controller reaches `target`.
    ///
    /// Fails if the controller faults or exits first.
    pub async fn wait_for_state(&self, target: ControllerState) -> AppResult<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| *s == target || *s == ControllerState::Faulted)
            .await
            .map(|s| *s)
            .map_err(|_| unavailable())?;

        if reached == target {
            Ok(())
        } else {
            Err(unavailable())
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> AppResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| unavailable())?;
        response.await.map_err(|_| unavailable())?
    }
}

fn unavailable() -> AppError {
    AppError::service_unavailable("Queue controller is not running")
}

/// Assembles a [`QueueController`] and its actor task.
#[derive(Debug)]
pub struct QueueControllerBuilder {
    config: AppConfig,
    registry: ExecutorRegistry,
    probe: Arc<dyn ResourceProbe>,
}

impl QueueControllerBuilder {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
            registry: ExecutorRegistry::new(),
            probe: Arc::new(SharedUsage::new()),
        }
    }

    /// Register an executor for its job kind.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.registry.register(executor);
        self
    }

    /// Use `probe` for admission backpressure. Defaults to a probe that
    /// always reads zero.
    pub fn probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Spawn the actor. Must be called from within a tokio runtime.
    ///
    /// The join handle resolves once the controller shuts down, or with the
    /// fatal error that stopped it.
    pub fn spawn(self) -> (QueueController, JoinHandle<AppResult<()>>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(self.config.worker.event_buffer);
        let (progress_tx, progress_rx) = watch::channel(0.0);
        let (state_tx, state_rx) = watch::channel(ControllerState::Idle);

        let actor = ControllerActor::new(
            &self.config,
            Arc::new(self.registry),
            self.probe,
            command_rx,
            event_tx.clone(),
            progress_tx,
            state_tx,
        );
        let task = tokio::spawn(actor.run());

        let handle = QueueController {
            commands: command_tx,
            events: event_tx,
            progress: progress_rx,
            state: state_rx,
        };
        (handle, task)
    }
}
