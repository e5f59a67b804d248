//! hfx-importer library interface
//!
//! Background bulk import of health metrics and workouts from a device
//! running the HFX RPC service. Exposes public APIs for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use hfx_common::sse::HEARTBEAT_INTERVAL;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::services::ImportManager;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Audit log database
    pub db: SqlitePool,
    /// Single-job import slot
    pub imports: Arc<ImportManager>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Cancelled on shutdown; ends open SSE streams
    pub shutdown: CancellationToken,
    /// How often an SSE stream re-checks the job in case it missed the end
    pub status_recheck: Duration,
}

impl AppState {
    pub fn new(db: SqlitePool, imports: Arc<ImportManager>) -> Self {
        Self {
            db,
            imports,
            startup_time: Utc::now(),
            shutdown: CancellationToken::new(),
            status_recheck: HEARTBEAT_INTERVAL,
        }
    }

    pub fn with_status_recheck(mut self, interval: Duration) -> Self {
        self.status_recheck = interval;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::import_routes())
        .route("/import/events", get(api::import_event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
