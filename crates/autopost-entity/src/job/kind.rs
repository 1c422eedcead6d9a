//! Job kind tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a job performs.
///
/// Executors are registered per kind; the queue itself never looks at the
/// payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Transcode or render a batch of videos.
    VideoProcessing,
    /// Build an analytics report.
    ReportGeneration,
    /// Deliver a batch of emails.
    EmailBatch,
    /// Score or tag content.
    ContentAnalysis,
    /// Publish one scheduled post.
    PostingAssignment,
    /// Any other kind, named by the integrating application.
    Custom(String),
}

impl JobKind {
    /// Return the kind as a snake_case string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::VideoProcessing => "video_processing",
            Self::ReportGeneration => "report_generation",
            Self::EmailBatch => "email_batch",
            Self::ContentAnalysis => "content_analysis",
            Self::PostingAssignment => "posting_assignment",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(name) => write!(f, "custom:{name}"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}
