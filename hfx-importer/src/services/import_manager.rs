//! Import manager
//!
//! Owns the single job slot. Starting a job is a guarded compare-and-swap
//! against "no job is Running"; the most recently finished job stays in the
//! slot so status polling still reports its outcome.
//!
//! Every job is finalized exactly once, by its supervisor task:
//! audit row closed → status Done → terminal event → done signal.

use chrono::Utc;
use hfx_common::events::{ImportStatus, JobStatus, ProgressEvent, RunOutcome};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::import_runs;
use crate::models::{default_metrics, ImportJob, ImportRequest, ImportSettings, MetricSpec, RunClosure};
use crate::services::chunk_planner::{plan_chunks, total_steps};
use crate::services::import_orchestrator::ImportOrchestrator;
use crate::services::ingestion_sink::IngestionSink;
use crate::services::progress_broadcaster::{ProgressBroadcaster, Subscription};

/// Reason recorded for user-cancelled runs
const CANCELLED_REASON: &str = "cancelled by user";

/// Attempts to close an audit record before giving up
const CLOSE_ATTEMPTS: u32 = 3;
const CLOSE_BACKOFF_MS: u64 = 100;

/// Accepted start request
#[derive(Debug, Clone, Serialize)]
pub struct StartedImport {
    pub run_id: Uuid,
    /// Advisory step total for progress display
    pub total_steps: usize,
    /// Chunks per metric series (and for workouts)
    pub chunks_per_series: usize,
}

/// Start rejection
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid import request: {0}")]
    InvalidInput(String),

    /// Another job still owns the slot
    #[error("import {run_id} is already in progress")]
    Conflict { run_id: Uuid, status: JobStatus },

    /// The audit row could not be opened; no job was started
    #[error("failed to open audit record: {0}")]
    AuditLog(#[source] hfx_common::Error),
}

/// Result of a cancel request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancelResult {
    /// False when no job was Running (idempotent no-op)
    pub cancel_requested: bool,
    pub status: JobStatus,
}

type JobSlot = Option<Arc<ImportJob>>;

/// Entry point for start / cancel / status / subscribe
pub struct ImportManager {
    db: SqlitePool,
    broadcaster: ProgressBroadcaster,
    sink: Arc<dyn IngestionSink>,
    settings: ImportSettings,
    metrics: Arc<[MetricSpec]>,
    slot: Mutex<JobSlot>,
}

impl ImportManager {
    /// Manager importing the default metric list
    pub fn new(db: SqlitePool, sink: Arc<dyn IngestionSink>, settings: ImportSettings) -> Self {
        Self::with_metrics(db, sink, settings, default_metrics())
    }

    pub fn with_metrics(
        db: SqlitePool,
        sink: Arc<dyn IngestionSink>,
        settings: ImportSettings,
        metrics: Vec<MetricSpec>,
    ) -> Self {
        Self {
            db,
            broadcaster: ProgressBroadcaster::new(settings.subscriber_queue_capacity),
            sink,
            settings,
            metrics: metrics.into(),
            slot: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Start a new import in the background
    ///
    /// Waits up to `conflict_grace` for a job that is already Cancelling;
    /// any still-active job is a conflict.
    pub async fn start(&self, request: ImportRequest) -> Result<StartedImport, StartError> {
        let chunks = plan_chunks(request.window, request.chunk_length());
        if chunks.is_empty() {
            return Err(StartError::InvalidInput(format!(
                "window {} yields no chunks",
                request.window
            )));
        }
        let chunks_per_series = chunks.len();
        let total = total_steps(self.metrics.len(), chunks_per_series);

        let mut slot = self.claim_slot().await?;

        let job = Arc::new(ImportJob::new(Uuid::new_v4(), request, total));
        let metadata = json!({
            "user": job.request.user,
            "metrics": self.metrics.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            "total_steps": total,
            "chunks_per_series": chunks_per_series,
        });
        import_runs::open_run(&self.db, &job, &metadata)
            .await
            .map_err(StartError::AuditLog)?;

        *slot = Some(Arc::clone(&job));
        drop(slot);

        info!(
            run_id = %job.run_id,
            addr = %job.request.address(),
            window = %job.request.window,
            chunks = chunks_per_series,
            total_steps = total,
            "Import job accepted"
        );
        self.broadcaster
            .broadcast(&ProgressEvent::Status(job.snapshot().await));

        let run_id = job.run_id;
        self.spawn_supervisor(job, chunks);

        Ok(StartedImport {
            run_id,
            total_steps: total,
            chunks_per_series,
        })
    }

    /// Lock the slot once no active job holds it
    async fn claim_slot(&self) -> Result<MutexGuard<'_, JobSlot>, StartError> {
        let mut waited = false;
        loop {
            let slot = self.slot.lock().await;
            let Some(current) = slot.as_ref().map(Arc::clone) else {
                return Ok(slot);
            };

            match current.status().await {
                JobStatus::Cancelling if !waited => {
                    // Release the slot while the cancelling job winds down
                    drop(slot);
                    waited = true;
                    if !current.wait_done(self.settings.conflict_grace).await {
                        warn!(
                            run_id = %current.run_id,
                            grace_ms = self.settings.conflict_grace.as_millis() as u64,
                            "Cancelling import did not finish within grace period"
                        );
                    }
                }
                status if status.is_active() => {
                    return Err(StartError::Conflict {
                        run_id: current.run_id,
                        status,
                    });
                }
                _ => return Ok(slot),
            }
        }
    }

    fn spawn_supervisor(&self, job: Arc<ImportJob>, chunks: Vec<hfx_common::events::ChunkWindow>) {
        let orchestrator = ImportOrchestrator::new(
            Arc::clone(&job),
            Arc::clone(&self.sink),
            self.broadcaster.clone(),
            self.settings.clone(),
            Arc::clone(&self.metrics),
            chunks,
        );
        let db = self.db.clone();
        let broadcaster = self.broadcaster.clone();

        tokio::spawn(async move {
            let run = tokio::spawn(async move { orchestrator.run().await });
            let (outcome, reason) = match run.await {
                Ok(RunOutcome::Cancelled) => (RunOutcome::Cancelled, Some(CANCELLED_REASON.to_string())),
                Ok(outcome) => (outcome, None),
                Err(e) => {
                    error!(run_id = %job.run_id, error = %e, "Import task failed");
                    (RunOutcome::Error, Some(format!("import task failed: {}", e)))
                }
            };
            finalize(&db, &broadcaster, &job, outcome, reason).await;
        });
    }

    /// Request cancellation of the Running job
    ///
    /// Idempotent: a second request, or one with no Running job, is a no-op
    /// that reports the current status.
    pub async fn cancel(&self) -> CancelResult {
        let current = self.slot.lock().await.clone();
        let Some(job) = current else {
            return CancelResult {
                cancel_requested: false,
                status: JobStatus::Idle,
            };
        };

        let cancel_requested = job.request_cancel().await;
        if cancel_requested {
            info!(run_id = %job.run_id, "Import cancellation requested");
            self.broadcaster
                .broadcast(&ProgressEvent::Status(job.snapshot().await));
        }
        CancelResult {
            cancel_requested,
            status: job.status().await,
        }
    }

    /// Point-in-time snapshot of the current (or last) job
    pub async fn status(&self) -> ImportStatus {
        let current = self.slot.lock().await.clone();
        match current {
            Some(job) => job.snapshot().await,
            None => ImportStatus::idle(),
        }
    }

    /// Register an observer and synthesize its initial snapshot
    ///
    /// The subscription is registered before the snapshot is taken, so no
    /// event after the snapshot can be missed (short of queue overflow).
    pub async fn subscribe(&self) -> (ImportStatus, Subscription) {
        let subscription = self.broadcaster.subscribe();
        let snapshot = self.status().await;
        (snapshot, subscription)
    }

    /// Cancel any active job and wait up to `grace` for it to finalize
    pub async fn shutdown(&self, grace: Duration) {
        let current = self.slot.lock().await.clone();
        let Some(job) = current else {
            return;
        };
        if !job.status().await.is_active() {
            return;
        }

        info!(run_id = %job.run_id, "Shutting down: cancelling active import");
        job.request_cancel().await;
        if !job.wait_done(grace).await {
            warn!(run_id = %job.run_id, "Active import did not finish before shutdown");
        }
    }
}

/// Close out a job exactly once
async fn finalize(
    db: &SqlitePool,
    broadcaster: &ProgressBroadcaster,
    job: &ImportJob,
    outcome: RunOutcome,
    reason: Option<String>,
) {
    if !job.claim_finalization() {
        return;
    }

    let counters = job.counters().await;
    let duration_ms = (Utc::now() - job.started_at).num_milliseconds().max(0) as u64;
    let closure = RunClosure {
        outcome,
        counters,
        duration_ms,
        error: reason.clone(),
    };

    let reason = match close_audit_record(db, job.run_id, &closure).await {
        Ok(()) => reason,
        Err(e) => {
            let failure = format!("audit log not closed: {}", e);
            Some(match reason {
                Some(reason) => format!("{}; {}", reason, failure),
                None => failure,
            })
        }
    };

    let final_status = job.finish(outcome, reason.clone()).await;
    info!(
        run_id = %job.run_id,
        outcome = outcome.as_str(),
        step = final_status.step,
        total = final_status.total,
        duration_ms,
        "Import finalized"
    );

    let event = match outcome {
        RunOutcome::Error => ProgressEvent::Error {
            run_id: Some(job.run_id),
            message: reason.unwrap_or_else(|| "import failed".to_string()),
            counters,
        },
        RunOutcome::Success | RunOutcome::Cancelled => ProgressEvent::Complete {
            run_id: job.run_id,
            outcome,
            counters,
            duration_ms,
            error: reason,
        },
    };
    broadcaster.broadcast(&event);
    job.signal_done();
}

/// Close the audit row, retrying any failure with a short backoff
///
/// `retry_on_lock` already waits out lock contention; this covers the
/// remaining transient failures (pool timeouts, I/O).
async fn close_audit_record(
    db: &SqlitePool,
    run_id: Uuid,
    closure: &RunClosure,
) -> hfx_common::Result<()> {
    let mut backoff_ms = CLOSE_BACKOFF_MS;
    let mut attempt = 1;
    loop {
        match import_runs::close_run(db, run_id, closure).await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                warn!(run_id = %run_id, "Audit record was already closed");
                return Ok(());
            }
            Err(e) if attempt >= CLOSE_ATTEMPTS => {
                error!(run_id = %run_id, attempt, error = %e, "Failed to close audit record");
                return Err(e);
            }
            Err(e) => {
                warn!(run_id = %run_id, attempt, error = %e, "Closing audit record failed, retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                attempt += 1;
            }
        }
    }
}
