//! Posting time optimizer configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Settings for spacing out scheduled posts.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SchedulingConfig {
    /// Gap in hours between consecutive posts on a high-frequency platform.
    #[serde(default = "default_high_frequency_gap")]
    #[validate(range(min = 1, max = 23))]
    pub high_frequency_gap_hours: u32,
    /// Gap in hours between consecutive posts on a platform without
    /// engagement data.
    #[serde(default = "default_fallback_spacing")]
    #[validate(range(min = 1))]
    pub fallback_spacing_hours: u32,
    /// Per-platform overrides of the "now + offset" fallback, keyed by
    /// platform name (e.g. `tiktok = 2`).
    #[serde(default)]
    pub fallback_offset_hours: BTreeMap<String, u32>,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            high_frequency_gap_hours: default_high_frequency_gap(),
            fallback_spacing_hours: default_fallback_spacing(),
            fallback_offset_hours: BTreeMap::new(),
        }
    }
}

fn default_high_frequency_gap() -> u32 {
    1
}

fn default_fallback_spacing() -> u32 {
    24
}
