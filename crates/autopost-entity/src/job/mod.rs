//! Background job domain entities.

pub mod filter;
pub mod kind;
pub mod model;
pub mod status;

pub use filter::JobFilter;
pub use kind::JobKind;
pub use model::Job;
pub use status::{JobPriority, JobStatus};
