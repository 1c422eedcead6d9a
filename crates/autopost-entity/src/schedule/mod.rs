//! Scheduling reference data and post assignments.

pub mod assignment;
pub mod content;
pub mod platform;
pub mod settings;
pub mod slot;

pub use assignment::{PostAssignment, PostStatus};
pub use content::ContentItem;
pub use platform::Platform;
pub use settings::{PlatformSettings, PostingFrequency};
pub use slot::ScheduleSlot;
