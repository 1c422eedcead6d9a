//! # autopost-core
//!
//! Core crate for AutoPost. Contains configuration schemas, typed
//! identifiers, and the unified error system shared by the job queue,
//! the worker pool, and the posting scheduler.
//!
//! This crate has **no** internal dependencies on other AutoPost crates.

pub mod config;
pub mod error;
pub mod result;
pub mod types;

pub use error::AppError;
pub use result::AppResult;
