//! Shared fixtures for hfx-importer integration tests

#![allow(dead_code)]

pub mod fake_device;

use async_trait::async_trait;
use hfx_common::events::ProgressEvent;
use hfx_importer::models::{ImportRequest, ImportSettings, MetricSpec, ProbePolicy};
use hfx_importer::services::{
    ImportManager, IngestCounters, IngestError, IngestionSink, Subscription,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// In-memory audit database with tables created
pub async fn test_db() -> SqlitePool {
    // One connection: every in-memory connection is its own database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    hfx_importer::db::init_tables(&pool).await.unwrap();
    pool
}

/// Short timeouts so recovery paths finish quickly
pub fn test_settings() -> ImportSettings {
    ImportSettings {
        default_chunk_days: 7,
        request_timeout: Duration::from_secs(2),
        probe: ProbePolicy {
            timeout: Duration::from_millis(50),
            attempts: 3,
            interval: Duration::from_millis(10),
        },
        max_chunk_attempts: 2,
        conflict_grace: Duration::from_secs(2),
        subscriber_queue_capacity: 256,
        default_user: "tester".to_string(),
    }
}

/// Two metrics keep step arithmetic small: total = 2 × chunks + chunks
pub fn test_metrics() -> Vec<MetricSpec> {
    vec![
        MetricSpec::new("step_count", true),
        MetricSpec::new("heart_rate", false),
    ]
}

/// 2025-01-01 ..= 2025-01-09 in 7-day chunks: [01-01, 01-08), [01-08, 01-10)
pub fn request(port: u16, dry_run: bool) -> ImportRequest {
    ImportRequest::new("127.0.0.1", port, "2025-01-01", "2025-01-09", 7, dry_run, "alice").unwrap()
}

/// Sink that keeps every payload and reports each array element as inserted
#[derive(Default)]
pub struct RecordingSink {
    payloads: Mutex<Vec<(Vec<u8>, String)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            payloads: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn writes(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn users(&self) -> Vec<String> {
        self.payloads
            .lock()
            .unwrap()
            .iter()
            .map(|(_, user)| user.clone())
            .collect()
    }
}

#[async_trait]
impl IngestionSink for RecordingSink {
    async fn ingest(&self, payload: &[u8], user: &str) -> Result<IngestCounters, IngestError> {
        self.payloads
            .lock()
            .unwrap()
            .push((payload.to_vec(), user.to_string()));
        if self.fail {
            return Err(IngestError::Unavailable("sink offline".to_string()));
        }
        let inserted = serde_json::from_slice::<serde_json::Value>(payload)
            .ok()
            .and_then(|v| v.as_array().map(|a| a.len() as u64))
            .unwrap_or(0);
        Ok(IngestCounters {
            inserted,
            duplicates: 0,
        })
    }
}

pub fn manager(db: SqlitePool, sink: Arc<dyn IngestionSink>) -> Arc<ImportManager> {
    Arc::new(ImportManager::with_metrics(db, sink, test_settings(), test_metrics()))
}

/// Drain `subscription` until the terminal event of `run_id`
pub async fn wait_for_terminal(subscription: &mut Subscription, run_id: Uuid) -> ProgressEvent {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match subscription.recv().await {
                Some(event @ ProgressEvent::Complete { run_id: id, .. }) if id == run_id => {
                    return event
                }
                Some(event @ ProgressEvent::Error { run_id: Some(id), .. }) if id == run_id => {
                    return event
                }
                Some(_) => continue,
                None => panic!("broadcaster closed before run {run_id} finished"),
            }
        }
    })
    .await
    .expect("import did not finish in time")
}

/// Wait for the first progress event
pub async fn wait_for_progress(subscription: &mut Subscription) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match subscription.recv().await {
                Some(ProgressEvent::Progress { .. }) => return,
                Some(_) => continue,
                None => panic!("broadcaster closed"),
            }
        }
    })
    .await
    .expect("no progress event");
}
