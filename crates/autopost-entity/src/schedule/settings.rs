//! Per-platform posting settings.

use serde::{Deserialize, Serialize};

use super::platform::Platform;

/// How densely posts are packed on a platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostingFrequency {
    /// One post per best slot per week.
    #[default]
    Normal,
    /// Several posts on the best day, one per hour gap.
    High,
}

/// Settings for one platform, supplied by an external configuration store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformSettings {
    /// Target platform.
    pub platform: Platform,
    /// Disabled platforms get no assignments.
    pub enabled: bool,
    /// Hashtags added to every post on the platform.
    #[serde(default)]
    pub default_hashtags: Vec<String>,
    /// Caption template; `{title}` and `{hashtags}` are substituted.
    #[serde(default)]
    pub caption_template: Option<String>,
    /// Posting density.
    #[serde(default)]
    pub posting_frequency: PostingFrequency,
}

impl PlatformSettings {
    /// Enabled settings with no hashtags or template.
    pub fn enabled(platform: Platform) -> Self {
        Self {
            platform,
            enabled: true,
            default_hashtags: Vec::new(),
            caption_template: None,
            posting_frequency: PostingFrequency::Normal,
        }
    }

    /// Switch to high-frequency posting.
    pub fn high_frequency(mut self) -> Self {
        self.posting_frequency = PostingFrequency::High;
        self
    }
}
