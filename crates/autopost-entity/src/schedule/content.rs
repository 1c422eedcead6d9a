//! Content awaiting distribution.

use serde::{Deserialize, Serialize};

/// A piece of content to be posted on every enabled platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    /// External content identifier.
    pub id: String,
    /// Title used in captions.
    pub title: String,
    /// Content-specific hashtags.
    #[serde(default)]
    pub hashtags: Vec<String>,
}

impl ContentItem {
    /// Content with a title and no hashtags.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            hashtags: Vec::new(),
        }
    }
}
