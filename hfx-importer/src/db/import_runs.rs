//! Import audit log operations
//!
//! One row per import run. A row is opened (status `running`) before any
//! device traffic and closed exactly once with the final outcome.

use chrono::{DateTime, Utc};
use hfx_common::events::ImportCounters;
use hfx_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{AuditStatus, ImportJob, ImportRunRecord, RunClosure};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Error recorded for runs found still open at startup
pub const INTERRUPTED_ERROR: &str = "interrupted: process restarted";

/// Insert the `running` row for a freshly started job
pub async fn open_run(pool: &SqlitePool, job: &ImportJob, metadata: &serde_json::Value) -> Result<()> {
    // Prepare all data BEFORE acquiring a connection
    let run_id = job.run_id.to_string();
    let request = &job.request;
    let range_start = request.window.start.format("%Y-%m-%dT%H:%M:%S").to_string();
    let range_end = request.window.end.format("%Y-%m-%dT%H:%M:%S").to_string();
    let metadata = serde_json::to_string(metadata)
        .map_err(|e| Error::Internal(format!("Failed to serialize metadata: {}", e)))?;
    let started_at = job.started_at.to_rfc3339();

    retry_on_lock("open_run", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO import_runs (
                run_id, status, host, port, range_start, range_end,
                chunk_days, dry_run, metadata, started_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run_id)
        .bind(AuditStatus::Running.as_str())
        .bind(&request.host)
        .bind(i64::from(request.port))
        .bind(&range_start)
        .bind(&range_end)
        .bind(i64::from(request.chunk_days))
        .bind(request.dry_run)
        .bind(&metadata)
        .bind(&started_at)
        .execute(pool)
        .await?;
        Ok::<_, Error>(())
    })
    .await
}

/// Write the final outcome of a run
///
/// Only a `running` row is updated, so a second close is a no-op. Returns
/// true if this call closed the row.
pub async fn close_run(pool: &SqlitePool, run_id: Uuid, closure: &RunClosure) -> Result<bool> {
    let run_id = run_id.to_string();
    let status = AuditStatus::from(closure.outcome);
    let counters = closure.counters;
    let ended_at = Utc::now().to_rfc3339();

    let rows = retry_on_lock("close_run", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE import_runs SET
                status = ?,
                metrics_received = ?,
                metrics_inserted = ?,
                workouts_received = ?,
                workouts_inserted = ?,
                duplicates = ?,
                chunks_skipped = ?,
                bytes_fetched = ?,
                duration_ms = ?,
                error = ?,
                ended_at = ?
            WHERE run_id = ? AND status = 'running'
            "#,
        )
        .bind(status.as_str())
        .bind(counters.metrics_received as i64)
        .bind(counters.metrics_inserted as i64)
        .bind(counters.workouts_received as i64)
        .bind(counters.workouts_inserted as i64)
        .bind(counters.duplicates as i64)
        .bind(counters.chunks_skipped as i64)
        .bind(counters.bytes_fetched as i64)
        .bind(closure.duration_ms as i64)
        .bind(&closure.error)
        .bind(&ended_at)
        .bind(&run_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected())
    })
    .await?;

    Ok(rows > 0)
}

/// Load one run by id
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<ImportRunRecord>> {
    let row = sqlx::query("SELECT * FROM import_runs WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|row| record_from_row(&row)).transpose()
}

/// Most recent runs first
pub async fn list_runs(pool: &SqlitePool, limit: u32) -> Result<Vec<ImportRunRecord>> {
    let rows = sqlx::query("SELECT * FROM import_runs ORDER BY started_at DESC LIMIT ?")
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

    rows.iter().map(record_from_row).collect()
}

/// Close runs left `running` by a previous process
///
/// Called once at startup, before the HTTP server accepts requests, so no
/// live job can own one of these rows. Returns the number of rows closed.
pub async fn reconcile_stale_runs(pool: &SqlitePool) -> Result<u64> {
    let ended_at = Utc::now().to_rfc3339();

    let closed = retry_on_lock("reconcile_stale_runs", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE import_runs SET status = ?, error = ?, ended_at = ?
            WHERE status = 'running'
            "#,
        )
        .bind(AuditStatus::Error.as_str())
        .bind(INTERRUPTED_ERROR)
        .bind(&ended_at)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected())
    })
    .await?;

    if closed > 0 {
        tracing::warn!(closed, "Closed import runs interrupted by a previous shutdown");
    }
    Ok(closed)
}

fn record_from_row(row: &SqliteRow) -> Result<ImportRunRecord> {
    let run_id: String = row.get("run_id");
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Failed to parse run_id: {}", e)))?;

    let status: String = row.get("status");
    let status = status.parse::<AuditStatus>().map_err(Error::Internal)?;

    let metadata: String = row.get("metadata");
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| Error::Internal(format!("Failed to deserialize metadata: {}", e)))?;

    let started_at: String = row.get("started_at");
    let started_at = parse_timestamp("started_at", &started_at)?;
    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| parse_timestamp("ended_at", &s))
        .transpose()?;

    let counters = ImportCounters {
        metrics_received: row.get::<i64, _>("metrics_received") as u64,
        metrics_inserted: row.get::<i64, _>("metrics_inserted") as u64,
        workouts_received: row.get::<i64, _>("workouts_received") as u64,
        workouts_inserted: row.get::<i64, _>("workouts_inserted") as u64,
        duplicates: row.get::<i64, _>("duplicates") as u64,
        chunks_skipped: row.get::<i64, _>("chunks_skipped") as u64,
        bytes_fetched: row.get::<i64, _>("bytes_fetched") as u64,
    };

    Ok(ImportRunRecord {
        run_id,
        status,
        host: row.get("host"),
        port: row.get::<i64, _>("port") as u16,
        range_start: row.get("range_start"),
        range_end: row.get("range_end"),
        chunk_days: row.get::<i64, _>("chunk_days") as u32,
        dry_run: row.get("dry_run"),
        counters,
        duration_ms: row.get::<Option<i64>, _>("duration_ms").map(|ms| ms as u64),
        error: row.get("error"),
        metadata,
        started_at,
        ended_at,
    })
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", field, e)))
}
