//! Persisted audit record of one import run

use chrono::{DateTime, Utc};
use hfx_common::events::{ImportCounters, RunOutcome};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Audit log status column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    /// Opened, not yet closed. Left behind if the process dies mid-run.
    Running,
    Success,
    Cancelled,
    Error,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Running => "running",
            AuditStatus::Success => "success",
            AuditStatus::Cancelled => "cancelled",
            AuditStatus::Error => "error",
        }
    }
}

impl From<RunOutcome> for AuditStatus {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Success => AuditStatus::Success,
            RunOutcome::Cancelled => AuditStatus::Cancelled,
            RunOutcome::Error => AuditStatus::Error,
        }
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(AuditStatus::Running),
            "success" => Ok(AuditStatus::Success),
            "cancelled" => Ok(AuditStatus::Cancelled),
            "error" => Ok(AuditStatus::Error),
            other => Err(format!("unknown audit status '{}'", other)),
        }
    }
}

/// One row of `import_runs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRunRecord {
    pub run_id: Uuid,
    pub status: AuditStatus,
    pub host: String,
    pub port: u16,
    pub range_start: String,
    pub range_end: String,
    pub chunk_days: u32,
    pub dry_run: bool,
    pub counters: ImportCounters,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    /// Free-form run details (metric list, user, step total)
    pub metadata: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Final values written when a run is closed
#[derive(Debug, Clone)]
pub struct RunClosure {
    pub outcome: RunOutcome,
    pub counters: ImportCounters,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_status_round_trips_through_str() {
        for status in [
            AuditStatus::Running,
            AuditStatus::Success,
            AuditStatus::Cancelled,
            AuditStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<AuditStatus>().unwrap(), status);
        }
        assert!("finished".parse::<AuditStatus>().is_err());
    }

    #[test]
    fn test_outcome_maps_to_distinct_statuses() {
        assert_eq!(AuditStatus::from(RunOutcome::Cancelled), AuditStatus::Cancelled);
        assert_eq!(AuditStatus::from(RunOutcome::Error), AuditStatus::Error);
        assert_ne!(
            AuditStatus::from(RunOutcome::Cancelled),
            AuditStatus::from(RunOutcome::Error)
        );
    }
}
