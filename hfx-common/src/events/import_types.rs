//! Import job type definitions
//!
//! Supporting types for import progress tracking, shared between the
//! importer and anything that renders its progress.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage of an import run. Metrics always run before workouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Metrics,
    Workouts,
}

impl ImportPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportPhase::Metrics => "metrics",
            ImportPhase::Workouts => "workouts",
        }
    }
}

/// Terminal result of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    /// Stopped on user request; not a failure
    Cancelled,
    Error,
}

impl RunOutcome {
    /// Status string stored in the audit log
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Cancelled => "cancelled",
            RunOutcome::Error => "error",
        }
    }
}

/// Import job lifecycle
///
/// Idle → Running → (Cancelling →) Done(outcome). Serialized as
/// `{"state": "done", "outcome": "cancelled"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Cancelling,
    Done(RunOutcome),
}

impl JobStatus {
    /// True while the background task still owns the job (Running or Cancelling)
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Cancelling)
    }

    pub fn is_done(&self) -> bool {
        matches!(self, JobStatus::Done(_))
    }
}

/// Half-open time window `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ChunkWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

impl std::fmt::Display for ChunkWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Running counters for one import run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub metrics_received: u64,
    pub metrics_inserted: u64,
    pub workouts_received: u64,
    pub workouts_inserted: u64,
    /// Records the sink reported as already stored
    pub duplicates: u64,
    /// Chunks abandoned after exhausting retries or rejected by the sink
    pub chunks_skipped: u64,
    pub bytes_fetched: u64,
}

impl ImportCounters {
    pub fn add_received(&mut self, phase: ImportPhase, records: u64) {
        match phase {
            ImportPhase::Metrics => self.metrics_received += records,
            ImportPhase::Workouts => self.workouts_received += records,
        }
    }

    pub fn add_inserted(&mut self, phase: ImportPhase, records: u64, duplicates: u64) {
        match phase {
            ImportPhase::Metrics => self.metrics_inserted += records,
            ImportPhase::Workouts => self.workouts_inserted += records,
        }
        self.duplicates += duplicates;
    }

    pub fn total_received(&self) -> u64 {
        self.metrics_received + self.workouts_received
    }

    pub fn total_inserted(&self) -> u64 {
        self.metrics_inserted + self.workouts_inserted
    }
}

/// Point-in-time snapshot of the import job
///
/// Returned by status polling and sent as the first event to every new
/// progress subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStatus {
    /// True while Running or Cancelling
    pub running: bool,
    pub status: JobStatus,
    pub run_id: Option<Uuid>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Whole import window
    pub window: Option<ChunkWindow>,
    pub dry_run: bool,
    pub phase: Option<ImportPhase>,
    pub step: usize,
    pub total: usize,
    pub current_metric: Option<String>,
    pub current_chunk: Option<ChunkWindow>,
    pub counters: ImportCounters,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ImportStatus {
    /// Snapshot reported when no import has run since startup
    pub fn idle() -> Self {
        Self {
            running: false,
            status: JobStatus::Idle,
            run_id: None,
            host: None,
            port: None,
            window: None,
            dry_run: false,
            phase: None,
            step: 0,
            total: 0,
            current_metric: None,
            current_chunk: None,
            counters: ImportCounters::default(),
            last_error: None,
            started_at: None,
            ended_at: None,
        }
    }
}
