//! Bulk job processing for AutoPost.
//!
//! This crate provides:
//! - A priority-then-FIFO job queue with delayed (backoff) admission
//! - A bounded worker pool that runs jobs through pluggable executors
//! - A retry policy that classifies executor failures
//! - A progress aggregator and admission backpressure gate
//! - The queue controller, a single-writer actor owning all job state
//! - A posting executor for scheduled social posts

pub mod backpressure;
pub mod controller;
pub mod events;
pub mod executor;
pub mod jobs;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod reporter;
pub mod retry;

pub use controller::{ControllerState, QueueController, QueueControllerBuilder, QueueSnapshot};
pub use executor::{Executor, ExecutorRegistry, Interruption, JobExecutionError};
pub use reporter::ProgressReporter;
