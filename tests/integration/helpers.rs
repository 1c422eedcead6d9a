//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use autopost_core::config::AppConfig;
use autopost_core::result::AppResult;
use autopost_core::types::id::JobId;
use autopost_entity::job::{Job, JobKind, JobPriority, JobStatus};
use autopost_entity::request::BulkOperationRequest;
use autopost_worker::backpressure::ResourceProbe;
use autopost_worker::{
    ControllerState, Executor, JobExecutionError, ProgressReporter, QueueController,
};

/// Nominal job duration used by the timing scenarios.
pub const UNIT: Duration = Duration::from_secs(4);

/// Test configuration: fast ticks, short retry backoff.
pub fn test_config(max_workers: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.worker.max_workers = max_workers;
    config.worker.tick_interval_ms = 100;
    config.worker.shutdown_grace_seconds = 5;
    config.retry.base_delay_ms = 200;
    config.retry.max_delay_ms = 1_000;
    config.backpressure.cooldown_ms = 1_000;
    config
}

/// A spawned controller plus its actor task.
pub struct TestQueue {
    pub controller: QueueController,
    pub task: JoinHandle<AppResult<()>>,
}

impl TestQueue {
    pub fn spawn(config: &AppConfig, executors: Vec<Arc<dyn Executor>>) -> Self {
        Self::spawn_with_probe(config, executors, None)
    }

    pub fn spawn_with_probe(
        config: &AppConfig,
        executors: Vec<Arc<dyn Executor>>,
        probe: Option<Arc<dyn ResourceProbe>>,
    ) -> Self {
        let mut builder = QueueController::builder(config);
        for executor in executors {
            builder = builder.executor(executor);
        }
        if let Some(probe) = probe {
            builder = builder.probe(probe);
        }
        let (controller, task) = builder.spawn();
        Self { controller, task }
    }

    /// Submit `targets` single-kind jobs of `items` items each.
    pub async fn submit(
        &self,
        kind: JobKind,
        priority: JobPriority,
        targets: usize,
        items: u32,
    ) -> Vec<JobId> {
        let request = BulkOperationRequest::new(
            kind,
            priority,
            (0..targets).map(|i| format!("target-{i}")),
        )
        .items_per_target(items);
        self.controller.submit(request).await.expect("submit")
    }

    pub async fn job(&self, id: JobId) -> Job {
        self.controller.get(id).await.expect("job exists")
    }

    pub async fn running(&self) -> usize {
        self.controller.snapshot().await.expect("snapshot").stats.running
    }

    pub async fn drained(&self) {
        tokio::time::timeout(
            Duration::from_secs(7 * 24 * 60 * 60),
            self.controller.wait_for_state(ControllerState::Completed),
        )
        .await
        .expect("queue drained in time")
        .expect("controller alive");
    }

    /// Poll until the job reaches `status`.
    pub async fn wait_for_status(&self, id: JobId, status: JobStatus) -> Job {
        for _ in 0..10_000 {
            let job = self.job(id).await;
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {status}");
    }

    pub async fn shutdown(self) {
        self.controller.shutdown().await.expect("shutdown");
        self.task.await.expect("join").expect("clean exit");
    }
}

/// Processes one item per `step`, checking for pause/cancel between items.
#[derive(Debug)]
pub struct SteppedExecutor {
    pub kind: JobKind,
    pub step: Duration,
    pub runs: AtomicU32,
    /// Runs currently executing.
    pub live: AtomicU32,
    /// Most runs ever executing at once.
    pub peak: AtomicU32,
}

impl SteppedExecutor {
    pub fn new(kind: JobKind, step: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            step,
            runs: AtomicU32::new(0),
            live: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        })
    }
}

/// Decrements a live-run counter when a run ends, however it ends.
struct LiveRun<'a>(&'a AtomicU32);

impl Drop for LiveRun<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Executor for SteppedExecutor {
    fn kind(&self) -> JobKind {
        self.kind.clone()
    }

    async fn run(&self, _job: &Job, progress: &mut ProgressReporter) -> Result<(), JobExecutionError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        let _live = LiveRun(&self.live);

        while progress.remaining() > 0 {
            tokio::time::sleep(self.step).await;
            progress.advance(1).await?;
        }
        Ok(())
    }
}

/// Fails with a transient error every time.
#[derive(Debug, Default)]
pub struct AlwaysTransient {
    pub calls: AtomicU32,
}

#[async_trait]
impl Executor for AlwaysTransient {
    fn kind(&self) -> JobKind {
        JobKind::EmailBatch
    }

    async fn run(&self, _job: &Job, _: &mut ProgressReporter) -> Result<(), JobExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(JobExecutionError::Transient("smtp 421 try again later".into()))
    }
}

/// Fails permanently until `broken` is cleared.
#[derive(Debug)]
pub struct Switchable {
    pub broken: AtomicBool,
    pub calls: AtomicU32,
}

impl Switchable {
    pub fn broken() -> Arc<Self> {
        Arc::new(Self {
            broken: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Executor for Switchable {
    fn kind(&self) -> JobKind {
        JobKind::ReportGeneration
    }

    async fn run(&self, _job: &Job, progress: &mut ProgressReporter) -> Result<(), JobExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(JobExecutionError::Permanent("template missing".into()));
        }
        progress.advance(progress.remaining()).await
    }
}

/// Never reports progress.
#[derive(Debug)]
pub struct Hung;

#[async_trait]
impl Executor for Hung {
    fn kind(&self) -> JobKind {
        JobKind::VideoProcessing
    }

    async fn run(&self, _job: &Job, _: &mut ProgressReporter) -> Result<(), JobExecutionError> {
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Reports resource exhaustion on the first call, then succeeds.
#[derive(Debug, Default)]
pub struct ExhaustedOnce {
    pub calls: AtomicU32,
}

#[async_trait]
impl Executor for ExhaustedOnce {
    fn kind(&self) -> JobKind {
        JobKind::ContentAnalysis
    }

    async fn run(&self, _job: &Job, progress: &mut ProgressReporter) -> Result<(), JobExecutionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(JobExecutionError::ResourceExhausted("gpu memory".into()));
        }
        progress.advance(progress.remaining()).await
    }
}
