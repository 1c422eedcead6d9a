//! Post scheduling.

pub mod caption;
pub mod optimizer;
pub mod planner;

pub use caption::render_caption;
pub use optimizer::{SchedulingOptimizer, best_slot, next_occurrence};
pub use planner::PostingPlanner;
