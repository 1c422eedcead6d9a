//! Optimal-time scheduler for content posts.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use tracing;

use autopost_core::config::SchedulingConfig;
use autopost_entity::schedule::{
    ContentItem, Platform, PlatformSettings, PostAssignment, PostStatus, PostingFrequency,
    ScheduleSlot,
};

use super::caption::render_caption;

/// Assigns publish times to content from per-platform engagement data.
///
/// For each enabled platform the best-scoring slot anchors the schedule: the
/// first post lands on the next occurrence of that slot after `now`, and
/// later posts follow weekly (normal frequency) or every few hours on the
/// slot's day (high frequency). Times on one platform are strictly
/// increasing, so no two posts on a platform collide.
#[derive(Debug, Clone, Default)]
pub struct SchedulingOptimizer {
    config: SchedulingConfig,
}

impl SchedulingOptimizer {
    /// Creates a new optimizer.
    pub fn new(config: SchedulingConfig) -> Self {
        Self { config }
    }

    /// Produce one assignment per (content item, enabled platform).
    pub fn optimize(
        &self,
        items: &[ContentItem],
        settings: &[PlatformSettings],
        slots: &[ScheduleSlot],
        now: DateTime<Utc>,
    ) -> Vec<PostAssignment> {
        let mut seen = HashSet::new();
        let mut assignments = Vec::with_capacity(items.len() * settings.len());

        for platform_settings in settings {
            let platform = platform_settings.platform;
            if !seen.insert(platform) {
                tracing::warn!("Duplicate settings for {} ignored", platform);
                continue;
            }
            if !platform_settings.enabled {
                tracing::debug!("Skipping disabled platform {}", platform);
                continue;
            }

            let times = match best_slot(slots, platform) {
                Some(slot) => self.slot_times(slot, platform_settings, items.len(), now),
                None => {
                    tracing::info!(
                        "No engagement data for {}, falling back to fixed offsets",
                        platform
                    );
                    self.fallback_times(platform_settings, items.len(), now)
                }
            };

            for (item, assigned_time) in items.iter().zip(times) {
                let hashtags = merge_hashtags(&item.hashtags, &platform_settings.default_hashtags);
                let caption = platform_settings
                    .caption_template
                    .as_deref()
                    .map(|template| render_caption(template, &item.title, &hashtags));

                assignments.push(PostAssignment {
                    content_id: item.id.clone(),
                    platform,
                    assigned_time,
                    hashtags,
                    caption,
                    status: PostStatus::Scheduled,
                });
            }
        }

        tracing::info!(
            "Scheduled {} posts for {} content items",
            assignments.len(),
            items.len()
        );
        assignments
    }

    fn slot_times(
        &self,
        slot: &ScheduleSlot,
        settings: &PlatformSettings,
        count: usize,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let first = next_occurrence(slot.day_of_week, slot.hour, now);
        let week = Duration::weeks(1);

        match settings.posting_frequency {
            PostingFrequency::Normal => (0..count)
                .scan(first, |next, _| {
                    let current = *next;
                    *next = current + week;
                    Some(current)
                })
                .collect(),
            PostingFrequency::High => {
                let gap = Duration::hours(i64::from(self.config.high_frequency_gap_hours.max(1)));
                let mut anchor = first;
                let mut current = first;
                let mut times = Vec::with_capacity(count);
                for _ in 0..count {
                    times.push(current);
                    let next = current + gap;
                    if next.date_naive() == anchor.date_naive() {
                        current = next;
                    } else {
                        anchor += week;
                        current = anchor;
                    }
                }
                times
            }
        }
    }

    fn fallback_times(
        &self,
        settings: &PlatformSettings,
        count: usize,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let offset = self
            .config
            .fallback_offset_hours
            .get(settings.platform.as_str())
            .map(|hours| Duration::hours(i64::from(*hours)))
            .unwrap_or_else(|| settings.platform.default_offset());

        let spacing_hours = match settings.posting_frequency {
            PostingFrequency::Normal => self.config.fallback_spacing_hours,
            PostingFrequency::High => self.config.high_frequency_gap_hours,
        };
        let spacing = Duration::hours(i64::from(spacing_hours.max(1)));

        let start = now + offset;
        (0..count)
            .map(|i| start + spacing * i as i32)
            .collect()
    }
}

/// The highest-engagement valid slot for `platform`.
///
/// Ties go to the larger audience, then to the lower competition.
pub fn best_slot(slots: &[ScheduleSlot], platform: Platform) -> Option<&ScheduleSlot> {
    slots
        .iter()
        .filter(|s| s.platform == platform)
        .filter(|s| {
            let valid = s.is_valid();
            if !valid {
                tracing::warn!(
                    "Ignoring invalid {} slot (day={}, hour={})",
                    platform,
                    s.day_of_week,
                    s.hour
                );
            }
            valid
        })
        .max_by(|a, b| compare_slots(a, b))
}

fn compare_slots(a: &ScheduleSlot, b: &ScheduleSlot) -> Ordering {
    a.engagement_score
        .total_cmp(&b.engagement_score)
        .then_with(|| a.audience_size.cmp(&b.audience_size))
        .then_with(|| b.competition_level.total_cmp(&a.competition_level))
}

/// The first `day_of_week` (0 = Sunday) at `hour`:00 UTC strictly after
/// `after`.
pub fn next_occurrence(day_of_week: u8, hour: u8, after: DateTime<Utc>) -> DateTime<Utc> {
    let today = after.weekday().num_days_from_sunday();
    let days_ahead = (u32::from(day_of_week) + 7 - today) % 7;
    let date = after.date_naive() + Duration::days(i64::from(days_ahead));
    let time = NaiveTime::from_hms_opt(u32::from(hour), 0, 0).unwrap_or_default();
    let candidate = Utc.from_utc_datetime(&date.and_time(time));

    if candidate > after {
        candidate
    } else {
        candidate + Duration::weeks(1)
    }
}

/// Item hashtags followed by platform defaults, without case-insensitive
/// duplicates.
fn merge_hashtags(item: &[String], defaults: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    item.iter()
        .chain(defaults)
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .cloned()
        .collect()
}
