//! Engagement-by-timeslot reference data.

use serde::{Deserialize, Serialize};

use super::platform::Platform;

/// A scored weekly publishing slot for one platform, in UTC.
///
/// Supplied by an external analytics collaborator and treated as read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    /// Platform the score applies to.
    pub platform: Platform,
    /// Day of week, 0 = Sunday … 6 = Saturday.
    pub day_of_week: u8,
    /// Hour of day, 0–23.
    pub hour: u8,
    /// Relative engagement score (higher is better).
    pub engagement_score: f64,
    /// Estimated reachable audience.
    pub audience_size: u64,
    /// How crowded the slot is (lower is better).
    pub competition_level: f64,
}

impl ScheduleSlot {
    /// Whether day and hour are within range.
    pub fn is_valid(&self) -> bool {
        self.day_of_week <= 6 && self.hour <= 23 && self.engagement_score.is_finite()
    }
}
