//! # autopost-service
//!
//! Posting logic that runs before jobs reach the queue: picking publish
//! times from engagement data, rendering captions, and turning the
//! resulting assignments into a bulk operation request.
//!
//! Everything here is synchronous and side-effect free apart from logging.

pub mod posting;

pub use posting::{PostingPlanner, SchedulingOptimizer};
