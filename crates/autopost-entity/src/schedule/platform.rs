//! Social platforms a post can target.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use autopost_core::error::AppError;

/// A publishing platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// TikTok.
    TikTok,
    /// Instagram (reels and feed).
    Instagram,
    /// YouTube Shorts.
    YouTube,
    /// Facebook.
    Facebook,
    /// X / Twitter.
    Twitter,
    /// LinkedIn.
    LinkedIn,
}

impl Platform {
    /// Return the platform as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TikTok => "tiktok",
            Self::Instagram => "instagram",
            Self::YouTube => "youtube",
            Self::Facebook => "facebook",
            Self::Twitter => "twitter",
            Self::LinkedIn => "linkedin",
        }
    }

    /// Delay from "now" used when no engagement data exists for the
    /// platform.
    pub fn default_offset(&self) -> Duration {
        match self {
            Self::Twitter => Duration::hours(1),
            Self::TikTok => Duration::hours(2),
            Self::Instagram => Duration::hours(3),
            Self::YouTube => Duration::hours(4),
            Self::Facebook => Duration::hours(5),
            Self::LinkedIn => Duration::hours(6),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiktok" => Ok(Self::TikTok),
            "instagram" => Ok(Self::Instagram),
            "youtube" => Ok(Self::YouTube),
            "facebook" => Ok(Self::Facebook),
            "twitter" | "x" => Ok(Self::Twitter),
            "linkedin" => Ok(Self::LinkedIn),
            other => Err(AppError::validation(format!("Unknown platform '{other}'"))),
        }
    }
}
