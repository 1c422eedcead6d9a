//! Integration tests for the posting scheduler and its hand-off to the
//! job queue.

mod helpers;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use autopost_core::config::SchedulingConfig;
use autopost_core::error::AppError;
use autopost_entity::job::{JobFilter, JobKind, JobStatus};
use autopost_entity::schedule::{
    ContentItem, Platform, PlatformSettings, PostAssignment, PostStatus, ScheduleSlot,
};
use autopost_service::{PostingPlanner, SchedulingOptimizer};
use autopost_worker::jobs::{PostingExecutor, Publisher, post_status};

use helpers::{TestQueue, test_config};

fn slot(platform: Platform, day_of_week: u8, hour: u8, score: f64) -> ScheduleSlot {
    ScheduleSlot {
        platform,
        day_of_week,
        hour,
        engagement_score: score,
        audience_size: 10_000,
        competition_level: 0.5,
    }
}

fn content(count: usize) -> Vec<ContentItem> {
    (1..=count)
        .map(|i| ContentItem::new(format!("clip-{i}"), format!("Episode {i}")))
        .collect()
}

fn wednesday_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, 9, 0, 0).unwrap()
}

#[test]
fn test_best_slot_anchors_weekly_schedule() {
    let slots = vec![
        slot(Platform::TikTok, 2, 18, 98.0),
        slot(Platform::TikTok, 5, 20, 91.0),
        slot(Platform::TikTok, 1, 12, 60.0),
    ];
    let settings = vec![PlatformSettings::enabled(Platform::TikTok)];

    let assignments =
        SchedulingOptimizer::default().optimize(&content(5), &settings, &slots, wednesday_morning());

    assert_eq!(assignments.len(), 5);
    let first = Utc.with_ymd_and_hms(2026, 10, 20, 18, 0, 0).unwrap();
    for (week, assignment) in assignments.iter().enumerate() {
        assert_eq!(assignment.platform, Platform::TikTok);
        assert_eq!(assignment.content_id, format!("clip-{}", week + 1));
        assert_eq!(
            assignment.assigned_time,
            first + chrono::Duration::weeks(week as i64)
        );
        assert_eq!(assignment.status, PostStatus::Scheduled);
    }
}

#[test]
fn test_platform_times_never_collide() {
    let slots = vec![
        slot(Platform::TikTok, 2, 18, 98.0),
        slot(Platform::Instagram, 3, 20, 88.0),
        slot(Platform::YouTube, 6, 23, 75.0),
    ];
    let settings = vec![
        PlatformSettings::enabled(Platform::TikTok).high_frequency(),
        PlatformSettings::enabled(Platform::Instagram),
        PlatformSettings::enabled(Platform::YouTube).high_frequency(),
        PlatformSettings::enabled(Platform::Twitter),
    ];

    let assignments =
        SchedulingOptimizer::default().optimize(&content(9), &settings, &slots, wednesday_morning());
    assert_eq!(assignments.len(), 9 * 4);

    for platform in [
        Platform::TikTok,
        Platform::Instagram,
        Platform::YouTube,
        Platform::Twitter,
    ] {
        let times: Vec<_> = assignments
            .iter()
            .filter(|a| a.platform == platform)
            .map(|a| a.assigned_time)
            .collect();
        assert_eq!(times.len(), 9);
        assert!(
            times.windows(2).all(|w| w[0] < w[1]),
            "{platform} times are not strictly increasing"
        );
        assert!(times.iter().all(|t| *t > wednesday_morning()));
        assert_eq!(times.iter().collect::<HashSet<_>>().len(), 9);
    }
}

#[test]
fn test_disabled_and_duplicate_platforms_are_skipped() {
    let mut disabled = PlatformSettings::enabled(Platform::Facebook);
    disabled.enabled = false;
    let settings = vec![
        PlatformSettings::enabled(Platform::LinkedIn),
        disabled,
        PlatformSettings::enabled(Platform::LinkedIn).high_frequency(),
    ];

    let assignments =
        SchedulingOptimizer::default().optimize(&content(2), &settings, &[], wednesday_morning());

    assert_eq!(assignments.len(), 2);
    assert!(assignments.iter().all(|a| a.platform == Platform::LinkedIn));
    assert_eq!(
        assignments[0].assigned_time,
        wednesday_morning() + Platform::LinkedIn.default_offset()
    );
}

#[derive(Debug, Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, Instant)>>,
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, assignment: &PostAssignment) -> Result<(), AppError> {
        self.published
            .lock()
            .unwrap()
            .push((assignment.target_id(), Instant::now()));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_planned_posts_publish_at_their_times() {
    let scheduling = SchedulingConfig {
        fallback_spacing_hours: 1,
        ..SchedulingConfig::default()
    };
    let mut settings = vec![
        PlatformSettings::enabled(Platform::Twitter),
        PlatformSettings::enabled(Platform::TikTok),
    ];
    settings[1].default_hashtags = vec!["#fyp".to_string()];
    settings[1].caption_template = Some("{title} {hashtags}".to_string());

    let planned_at = Utc::now();
    let assignments =
        SchedulingOptimizer::new(scheduling).optimize(&content(3), &settings, &[], planned_at);
    assert_eq!(assignments.len(), 6);
    assert_eq!(
        assignments[3].caption.as_deref(),
        Some("Episode 1 #fyp")
    );

    let request = PostingPlanner::new().plan(&assignments).unwrap();
    assert_eq!(request.category, JobKind::PostingAssignment);

    let mut config = test_config(1);
    config.worker.tick_interval_ms = 60_000;
    let publisher = Arc::new(RecordingPublisher::default());
    let queue = TestQueue::spawn(
        &config,
        vec![Arc::new(PostingExecutor::new(publisher.clone()))],
    );

    let started = Instant::now();
    let ids = queue.controller.submit(request).await.unwrap();
    queue.controller.start().await.unwrap();

    // Nothing is due yet.
    tokio::time::sleep(Duration::from_secs(30 * 60)).await;
    assert!(publisher.published.lock().unwrap().is_empty());

    queue.drained().await;

    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(published.len(), 6);
    for assignment in &assignments {
        let (_, at) = published
            .iter()
            .find(|(target, _)| *target == assignment.target_id())
            .expect("every assignment is published");
        let due = (assignment.assigned_time - planned_at)
            .to_std()
            .unwrap_or_default();
        assert!(
            *at + Duration::from_secs(1) >= started + due,
            "{} published before its time",
            assignment.target_id()
        );
    }

    let jobs = queue.controller.list(JobFilter::all()).await.unwrap();
    assert_eq!(jobs.len(), ids.len());
    assert!(
        jobs.iter()
            .all(|j| post_status(j.status) == PostStatus::Posted && j.status == JobStatus::Completed)
    );

    queue.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_post_is_never_published() {
    let settings = vec![PlatformSettings::enabled(Platform::YouTube)];
    let assignments =
        SchedulingOptimizer::default().optimize(&content(2), &settings, &[], Utc::now());
    let request = PostingPlanner::new().plan(&assignments).unwrap();

    let mut config = test_config(1);
    config.worker.tick_interval_ms = 60_000;
    let publisher = Arc::new(RecordingPublisher::default());
    let queue = TestQueue::spawn(
        &config,
        vec![Arc::new(PostingExecutor::new(publisher.clone()))],
    );

    let ids = queue.controller.submit(request).await.unwrap();
    queue.controller.start().await.unwrap();

    let cancelled = queue.controller.cancel_job(ids[0]).await.unwrap();
    assert_eq!(post_status(cancelled.status), PostStatus::Cancelled);

    queue.drained().await;
    let published = publisher.published.lock().unwrap().clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, assignments[1].target_id());

    queue.shutdown().await;
}
