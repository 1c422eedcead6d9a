//! Post assignments produced by the scheduling optimizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::platform::Platform;

/// Publication status of an assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    /// Waiting for its publish time.
    #[default]
    Scheduled,
    /// Published.
    Posted,
    /// Publishing failed.
    Failed,
    /// Withdrawn before publishing.
    Cancelled,
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Posted => "posted",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One content item scheduled on one platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostAssignment {
    /// Content being posted.
    pub content_id: String,
    /// Target platform.
    pub platform: Platform,
    /// Absolute publish time.
    pub assigned_time: DateTime<Utc>,
    /// Hashtags to attach.
    pub hashtags: Vec<String>,
    /// Rendered caption, if the platform has a template.
    pub caption: Option<String>,
    /// Publication status.
    #[serde(default)]
    pub status: PostStatus,
}

impl PostAssignment {
    /// Stable identifier for the (content, platform) pair.
    pub fn target_id(&self) -> String {
        format!("{}:{}", self.content_id, self.platform)
    }
}
