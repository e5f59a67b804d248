//! Database access for hfx-importer
//!
//! SQLite holds the import audit log.

pub mod import_runs;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let options = SqliteConnectOptions::from_str(&db_url)?
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create hfx-importer tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> hfx_common::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_runs (
            run_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            host TEXT NOT NULL,
            port INTEGER NOT NULL,
            range_start TEXT NOT NULL,
            range_end TEXT NOT NULL,
            chunk_days INTEGER NOT NULL,
            dry_run INTEGER NOT NULL DEFAULT 0,
            metrics_received INTEGER NOT NULL DEFAULT 0,
            metrics_inserted INTEGER NOT NULL DEFAULT 0,
            workouts_received INTEGER NOT NULL DEFAULT 0,
            workouts_inserted INTEGER NOT NULL DEFAULT 0,
            duplicates INTEGER NOT NULL DEFAULT 0,
            chunks_skipped INTEGER NOT NULL DEFAULT 0,
            bytes_fetched INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER,
            error TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            started_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_import_runs_started_at ON import_runs (started_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (import_runs)");

    Ok(())
}
