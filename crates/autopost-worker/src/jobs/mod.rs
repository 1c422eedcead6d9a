//! Built-in executor implementations.

pub mod posting;

pub use posting::{PostingExecutor, Publisher, post_status};
