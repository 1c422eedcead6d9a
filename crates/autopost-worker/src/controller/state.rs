//! Controller lifecycle state and snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::queue::QueueStats;

/// Lifecycle of the queue controller.
///
/// `Idle` → `Running` on start; `Running` ⇄ `Paused`; `Running` →
/// `Completed` once nothing is queued or running; `Completed` → `Running`
/// on new work; `Running`/`Paused` → `Idle` on stop. `Faulted` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    /// An internal invariant broke; the controller must be rebuilt.
    Faulted,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub state: ControllerState,
    pub stats: QueueStats,
    /// Aggregate progress in 0..=100.
    pub progress: f64,
    /// Worker slots held, including runs winding down after a stop or cancel.
    pub in_flight: usize,
    pub max_workers: usize,
    /// Admission is being held back by resource usage.
    pub backpressure_engaged: bool,
}
