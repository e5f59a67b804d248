//! Event types for the HFX progress stream
//!
//! Provides the event definitions broadcast by the importer to every
//! connected observer.

mod import_types;

pub use import_types::{
    ChunkWindow, ImportCounters, ImportPhase, ImportStatus, JobStatus, RunOutcome,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Import progress event
///
/// Events are fanned out to observers and serialized for SSE transmission.
/// A stream ends after `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// One chunk was attempted (fetched, skipped or empty)
    Progress {
        /// Chunks attempted so far, never decreases within a run
        step: usize,
        /// Advisory total for display
        total: usize,
        /// Metric name, None during the workouts phase
        metric: Option<String>,
        chunk: ChunkWindow,
        phase: ImportPhase,
    },

    /// Full job snapshot (phase changes, cancel requests, new subscribers)
    Status(ImportStatus),

    /// Run finished with success or cancellation
    Complete {
        run_id: Uuid,
        outcome: RunOutcome,
        counters: ImportCounters,
        duration_ms: u64,
        /// Readable reason when the outcome is not success
        error: Option<String>,
    },

    /// Run failed
    Error {
        run_id: Option<Uuid>,
        message: String,
        counters: ImportCounters,
    },
}

impl ProgressEvent {
    /// Get event type as string (used as the SSE event name)
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Status(_) => "status",
            ProgressEvent::Complete { .. } => "complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// True for the last event of a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }
}
