//! Core type definitions used across the AutoPost workspace.

pub mod id;

pub use id::*;
