//! # autopost-entity
//!
//! Domain models for AutoPost. The job records tracked by the queue, the
//! read-only scheduling reference data, the post assignments produced by the
//! optimizer, and the bulk submission shape accepted by the controller.
//! Every type derives `Debug`, `Clone`, `Serialize`, and `Deserialize`.

pub mod job;
pub mod request;
pub mod schedule;
