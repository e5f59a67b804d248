//! Ingestion sink
//!
//! The importer hands each chunk's raw payload to a sink that owns shape
//! detection, deduplication and storage. The importer treats it as opaque.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Header carrying the user the payload belongs to
pub const USER_HEADER: &str = "X-Hfx-User";

/// Per-chunk result reported by the sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct IngestCounters {
    /// Records newly stored
    #[serde(default)]
    pub inserted: u64,
    /// Records already present and skipped
    #[serde(default)]
    pub duplicates: u64,
}

/// Sink failure; the chunk is skipped, the import continues
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion rejected payload: {0}")]
    Rejected(String),

    #[error("ingestion endpoint unavailable: {0}")]
    Unavailable(String),
}

/// Destination for fetched chunk payloads
#[async_trait]
pub trait IngestionSink: Send + Sync {
    /// Ingest one chunk's payload, exactly as fetched from the device
    async fn ingest(&self, payload: &[u8], user: &str) -> Result<IngestCounters, IngestError>;
}

/// Forwards payloads to the push-ingestion HTTP endpoint
pub struct HttpIngestionSink {
    client: reqwest::Client,
    url: String,
}

impl HttpIngestionSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("hfx-importer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IngestionSink for HttpIngestionSink {
    async fn ingest(&self, payload: &[u8], user: &str) -> Result<IngestCounters, IngestError> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(USER_HEADER, user)
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| IngestError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Rejected(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            return Err(IngestError::Unavailable(format!("HTTP {}", status)));
        }

        let counters = response
            .json::<IngestCounters>()
            .await
            .map_err(|e| IngestError::Rejected(format!("unreadable ingest response: {}", e)))?;
        debug!(
            user,
            bytes = payload.len(),
            inserted = counters.inserted,
            duplicates = counters.duplicates,
            "Payload ingested"
        );
        Ok(counters)
    }
}

/// Used when no ingestion endpoint is configured: accepts and stores nothing
#[derive(Debug, Default)]
pub struct DiscardingSink;

#[async_trait]
impl IngestionSink for DiscardingSink {
    async fn ingest(&self, payload: &[u8], user: &str) -> Result<IngestCounters, IngestError> {
        debug!(user, bytes = payload.len(), "No ingestion endpoint configured, payload discarded");
        Ok(IngestCounters::default())
    }
}
