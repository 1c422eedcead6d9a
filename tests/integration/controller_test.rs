//! Integration tests for the queue controller.
//!
//! All tests run on tokio's paused clock, so the multi-second timelines
//! below complete instantly and deterministically.

mod helpers;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, sleep, sleep_until};

use autopost_core::error::ErrorKind;
use autopost_entity::job::{JobFilter, JobKind, JobPriority, JobStatus};
use autopost_entity::request::BulkOperationRequest;
use autopost_worker::ControllerState;
use autopost_worker::backpressure::SharedUsage;
use autopost_worker::events::QueueEvent;

use helpers::{
    AlwaysTransient, ExhaustedOnce, Hung, SteppedExecutor, Switchable, TestQueue, UNIT,
    test_config,
};

fn step() -> Duration {
    UNIT / 4
}

#[tokio::test(start_paused = true)]
async fn test_bounded_concurrency_drains_in_waves() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(4), vec![executor.clone()]);
    let ids = queue
        .submit(JobKind::ReportGeneration, JobPriority::Normal, 12, 4)
        .await;
    assert_eq!(ids.len(), 12);

    let mut events = queue.controller.subscribe();
    let watcher = tokio::spawn(async move {
        let mut running = HashSet::new();
        let mut peak = 0;
        loop {
            match events.recv().await {
                Ok(QueueEvent::JobStatusChanged(change)) => {
                    if change.status == JobStatus::Running {
                        running.insert(change.job_id);
                    } else {
                        running.remove(&change.job_id);
                    }
                    peak = peak.max(running.len());
                }
                Ok(QueueEvent::ControllerStateChanged {
                    state: ControllerState::Completed,
                    ..
                }) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        peak
    });

    let started = Instant::now();
    queue.controller.start().await.unwrap();

    for wave in 0..3u32 {
        sleep_until(started + UNIT * wave + UNIT * 3 / 10).await;
        assert_eq!(queue.running().await, 4, "wave {wave} should fill every worker");
    }

    let midway = queue.controller.progress();
    assert!(midway > 0.0 && midway < 100.0);

    queue.drained().await;
    let elapsed = started.elapsed();
    assert!(elapsed >= UNIT * 3, "drained too early: {elapsed:?}");
    assert!(elapsed < UNIT * 3 + Duration::from_millis(500), "drained late: {elapsed:?}");

    assert!(watcher.await.unwrap() <= 4);
    assert_eq!(executor.runs.load(Ordering::SeqCst), 12);
    assert_eq!(queue.controller.progress(), 100.0);

    let completed = queue
        .controller
        .list(JobFilter::all().with_statuses(&[JobStatus::Completed]))
        .await
        .unwrap();
    assert_eq!(completed.len(), 12);
    assert!(completed.iter().all(|j| j.processed_count == 4));

    assert_eq!(queue.controller.clear_finished().await.unwrap(), 12);
    assert!(queue.controller.list(JobFilter::all()).await.unwrap().is_empty());
    assert_eq!(queue.controller.progress(), 0.0);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_exhaust_retries() {
    let executor = Arc::new(AlwaysTransient::default());
    let queue = TestQueue::spawn(&test_config(2), vec![executor.clone()]);
    let id = queue.submit(JobKind::EmailBatch, JobPriority::Normal, 1, 1).await[0];

    queue.controller.start().await.unwrap();
    queue.drained().await;

    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.remaining_retries(), 0);
    assert!(job.error_message.unwrap().contains("smtp 421"));
    assert_eq!(executor.calls.load(Ordering::SeqCst), 4);

    // No retries left, so nothing is requeued.
    assert_eq!(queue.controller.retry_failed().await.unwrap(), 0);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
    assert_eq!(queue.job(id).await.status, JobStatus::Failed);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pause_takes_effect_at_step_boundary() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(2), vec![executor.clone()]);
    let id = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 1, 4).await[0];

    let started = Instant::now();
    queue.controller.start().await.unwrap();

    sleep_until(started + step() * 3 / 2).await;
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.processed_count, 1);

    queue.controller.pause_job(id).await.unwrap();

    // The current step is still in progress.
    sleep_until(started + step() * 18 / 10).await;
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.processed_count, 1);

    sleep_until(started + step() * 5 / 2).await;
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.processed_count, 2);

    sleep(UNIT * 2).await;
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.processed_count, 2);
    assert_eq!(executor.runs.load(Ordering::SeqCst), 1);

    queue.controller.resume_job(id).await.unwrap();
    queue.drained().await;

    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, 4);
    assert_eq!(executor.runs.load(Ordering::SeqCst), 2);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_paused_job_removes_it() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(1), vec![executor]);
    let ids = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 2, 4).await;

    // A queued job pauses immediately.
    queue.controller.pause_job(ids[1]).await.unwrap();
    assert_eq!(queue.job(ids[1]).await.status, JobStatus::Paused);

    let cancelled = queue.controller.cancel_job(ids[1]).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    let err = queue.controller.get(ids[1]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    // A running job pauses at its next step, then can be cancelled.
    queue.controller.start().await.unwrap();
    sleep(step() * 3 / 2).await;
    queue.controller.pause_job(ids[0]).await.unwrap();
    queue.wait_for_status(ids[0], JobStatus::Paused).await;

    let cancelled = queue.controller.cancel_job(ids[0]).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(queue.controller.list(JobFilter::all()).await.unwrap().is_empty());

    let err = queue.controller.cancel_job(ids[0]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let snapshot = queue.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.stats.total, 0);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_job_holds_slot_until_next_step() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(1), vec![executor.clone()]);
    let ids = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 2, 4).await;

    let started = Instant::now();
    queue.controller.start().await.unwrap();
    sleep_until(started + step() * 3 / 2).await;

    let cancelled = queue.controller.cancel_job(ids[0]).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.processed_count, 1);

    let err = queue.controller.get(ids[0]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    // The cancelled worker still owns the only slot.
    let snapshot = queue.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.in_flight, 1);
    assert_eq!(queue.job(ids[1]).await.status, JobStatus::Queued);

    sleep_until(started + step() * 21 / 10).await;
    assert_eq!(queue.job(ids[1]).await.status, JobStatus::Running);

    queue.drained().await;
    let job = queue.job(ids[1]).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(executor.runs.load(Ordering::SeqCst), 2);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_priority_then_submission_order() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, Duration::from_millis(100));
    let queue = TestQueue::spawn(&test_config(1), vec![executor]);

    let low = queue.submit(JobKind::ReportGeneration, JobPriority::Low, 2, 1).await;
    let normal = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 1, 1).await;
    let urgent = queue.submit(JobKind::ReportGeneration, JobPriority::Urgent, 1, 1).await;

    let mut events = queue.controller.subscribe();
    queue.controller.start().await.unwrap();
    queue.drained().await;

    let mut started = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::JobStatusChanged(change) = event {
            if change.status == JobStatus::Running && !started.contains(&change.job_id) {
                started.push(change.job_id);
            }
        }
    }

    assert_eq!(started, vec![urgent[0], normal[0], low[0], low[1]]);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_queue_pause_parks_running_jobs() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(2), vec![executor]);
    let ids = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 4, 4).await;

    let started = Instant::now();
    queue.controller.start().await.unwrap();
    sleep_until(started + step() * 3 / 2).await;

    queue.controller.pause().await.unwrap();
    assert_eq!(queue.controller.state(), ControllerState::Paused);

    sleep_until(started + step() * 5 / 2).await;
    for id in &ids[..2] {
        let job = queue.job(*id).await;
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.processed_count, 2);
    }
    for id in &ids[2..] {
        assert_eq!(queue.job(*id).await.status, JobStatus::Queued);
    }

    sleep(UNIT * 2).await;
    let snapshot = queue.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ControllerState::Paused);
    assert_eq!(snapshot.stats.running, 0);
    assert_eq!(snapshot.stats.paused, 2);

    queue.controller.resume().await.unwrap();
    assert_eq!(queue.controller.state(), ControllerState::Running);
    queue.drained().await;

    let jobs = queue.controller.list(JobFilter::all()).await.unwrap();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    assert!(jobs.iter().all(|j| j.processed_count == 4));

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_requeues_running_jobs() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(2), vec![executor]);
    let ids = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 3, 4).await;

    let started = Instant::now();
    queue.controller.start().await.unwrap();
    sleep_until(started + step() * 3 / 2).await;

    queue.controller.stop().await.unwrap();
    assert_eq!(queue.controller.state(), ControllerState::Idle);

    for id in &ids[..2] {
        let job = queue.job(*id).await;
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.processed_count, 1);
    }

    sleep(UNIT).await;
    let snapshot = queue.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.stats.running, 0);
    assert_eq!(snapshot.stats.queued, 3);
    assert_eq!(snapshot.in_flight, 0);

    let err = queue.controller.pause().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    queue.controller.start().await.unwrap();
    queue.drained().await;
    for id in &ids {
        let job = queue.job(*id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.processed_count, 4);
    }

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop_waits_for_previous_run() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(2), vec![executor.clone()]);
    let id = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 1, 4).await[0];

    let started = Instant::now();
    queue.controller.start().await.unwrap();
    sleep_until(started + step() * 3 / 2).await;

    queue.controller.stop().await.unwrap();
    queue.controller.start().await.unwrap();

    // The stopped run still owns the job until its current step ends.
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(executor.runs.load(Ordering::SeqCst), 1);

    sleep_until(started + step() * 21 / 10).await;
    assert_eq!(queue.job(id).await.status, JobStatus::Running);

    queue.drained().await;
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_count, 4);
    assert_eq!(executor.runs.load(Ordering::SeqCst), 2);
    assert_eq!(executor.peak.load(Ordering::SeqCst), 1);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_failed_and_retry_job() {
    let executor = Switchable::broken();
    let queue = TestQueue::spawn(&test_config(2), vec![executor.clone()]);
    let ids = queue
        .submit(JobKind::ReportGeneration, JobPriority::Normal, 2, 1)
        .await;

    queue.controller.start().await.unwrap();
    queue.drained().await;

    for id in &ids {
        let job = queue.job(*id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0, "permanent errors are not retried");
        assert!(job.error_message.unwrap().ends_with("template missing"));
    }
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    executor.broken.store(false, Ordering::SeqCst);
    assert_eq!(queue.controller.retry_failed().await.unwrap(), 2);
    queue.drained().await;
    for id in &ids {
        let job = queue.job(*id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error_message.is_none());
    }

    let err = queue.controller.retry_job(ids[0]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    executor.broken.store(true, Ordering::SeqCst);
    let id = queue
        .submit(JobKind::ReportGeneration, JobPriority::High, 1, 1)
        .await[0];
    queue.drained().await;
    assert_eq!(queue.job(id).await.status, JobStatus::Failed);

    executor.broken.store(false, Ordering::SeqCst);
    queue.controller.retry_job(id).await.unwrap();
    queue.drained().await;
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 0);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_job_is_force_failed() {
    let queue = TestQueue::spawn(&test_config(1), vec![Arc::new(Hung)]);
    let request = BulkOperationRequest::new(
        JobKind::VideoProcessing,
        JobPriority::Normal,
        ["clip-1"],
    )
    .estimated_duration(Duration::from_secs(1));
    let id = queue.controller.submit(request).await.unwrap()[0];

    let started = Instant::now();
    queue.controller.start().await.unwrap();
    queue.drained().await;

    assert!(started.elapsed() >= Duration::from_secs(3));
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("Stalled"));

    sleep(Duration::from_millis(100)).await;
    let snapshot = queue.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.in_flight, 0);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backpressure_holds_admission() {
    let usage = SharedUsage::new();
    usage.set(0.95);

    let executor = SteppedExecutor::new(JobKind::ReportGeneration, Duration::from_millis(100));
    let queue = TestQueue::spawn_with_probe(
        &test_config(2),
        vec![executor.clone()],
        Some(Arc::new(usage.clone())),
    );
    let ids = queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 2, 1).await;

    queue.controller.start().await.unwrap();
    sleep(Duration::from_secs(1)).await;

    let snapshot = queue.controller.snapshot().await.unwrap();
    assert!(snapshot.backpressure_engaged);
    assert_eq!(snapshot.stats.queued, 2);
    assert_eq!(executor.runs.load(Ordering::SeqCst), 0);

    // Between the thresholds the gate stays engaged.
    usage.set(0.8);
    sleep(Duration::from_secs(1)).await;
    assert_eq!(executor.runs.load(Ordering::SeqCst), 0);

    usage.set(0.5);
    queue.drained().await;
    for id in &ids {
        assert_eq!(queue.job(*id).await.status, JobStatus::Completed);
    }
    assert!(!queue.controller.snapshot().await.unwrap().backpressure_engaged);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resource_exhaustion_defers_without_spending_retry() {
    let executor = Arc::new(ExhaustedOnce::default());
    let queue = TestQueue::spawn(&test_config(1), vec![executor.clone()]);
    let id = queue
        .submit(JobKind::ContentAnalysis, JobPriority::Normal, 1, 1)
        .await[0];

    let started = Instant::now();
    queue.controller.start().await.unwrap();
    queue.drained().await;

    assert!(started.elapsed() >= Duration::from_secs(1));
    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_kind_fails_permanently() {
    let queue = TestQueue::spawn(&test_config(1), Vec::new());
    let id = queue.submit(JobKind::Custom("data_import".into()), JobPriority::Normal, 1, 1).await[0];

    queue.controller.start().await.unwrap();
    queue.drained().await;

    let job = queue.job(id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job.error_message.unwrap().contains("No executor registered"));

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rejected_submissions_admit_nothing() {
    let mut config = test_config(1);
    config.worker.max_queued_jobs = 2;
    let queue = TestQueue::spawn(&config, Vec::new());

    let empty = BulkOperationRequest::new(
        JobKind::ReportGeneration,
        JobPriority::Normal,
        Vec::<String>::new(),
    );
    let err = queue.controller.submit(empty).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);

    let oversized = BulkOperationRequest::new(
        JobKind::ReportGeneration,
        JobPriority::Normal,
        ["a", "b", "c"],
    );
    let err = queue.controller.submit(oversized).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);
    assert!(queue.controller.list(JobFilter::all()).await.unwrap().is_empty());

    queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 2, 1).await;
    let err = queue
        .controller
        .submit(BulkOperationRequest::new(
            JobKind::ReportGeneration,
            JobPriority::Normal,
            ["d"],
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::QueueFull);

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_lets_running_jobs_wind_down() {
    let executor = SteppedExecutor::new(JobKind::ReportGeneration, step());
    let queue = TestQueue::spawn(&test_config(2), vec![executor]);
    queue.submit(JobKind::ReportGeneration, JobPriority::Normal, 2, 4).await;

    queue.controller.start().await.unwrap();
    sleep(step() / 2).await;

    let controller = queue.controller.clone();
    queue.shutdown().await;

    let err = controller.snapshot().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ServiceUnavailable);
}
