//! Import workflow API handlers
//!
//! POST /import/start, POST /import/cancel, GET /import/status,
//! GET /import/runs, GET /import/runs/:run_id

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use hfx_common::events::ImportStatus;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::import_runs,
    error::{ApiError, ApiResult},
    models::{ImportRequest, ImportRunRecord},
    services::{CancelResult, StartedImport},
    AppState,
};

/// Default and maximum page size for GET /import/runs
const DEFAULT_RUNS_LIMIT: u32 = 20;
const MAX_RUNS_LIMIT: u32 = 500;

/// POST /import/start request
#[derive(Debug, Deserialize)]
pub struct StartImportRequest {
    pub host: String,
    pub port: u16,
    /// Inclusive first day, `YYYY-MM-DD`
    pub start_date: String,
    /// Inclusive last day, `YYYY-MM-DD`
    pub end_date: String,
    #[serde(default)]
    pub chunk_days: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub user: Option<String>,
}

/// GET /import/runs query
#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<u32>,
}

/// POST /import/start
///
/// Validates the request and starts the background import. 409 while
/// another import is in progress.
pub async fn start_import(
    State(state): State<AppState>,
    Json(request): Json<StartImportRequest>,
) -> ApiResult<Json<StartedImport>> {
    let settings = state.imports.settings();
    let user = request
        .user
        .as_deref()
        .unwrap_or(&settings.default_user)
        .to_string();
    let request = ImportRequest::new(
        &request.host,
        request.port,
        &request.start_date,
        &request.end_date,
        request.chunk_days.unwrap_or(settings.default_chunk_days),
        request.dry_run,
        &user,
    )?;

    let started = state.imports.start(request).await?;
    tracing::info!(run_id = %started.run_id, "Import start request accepted");
    Ok(Json(started))
}

/// POST /import/cancel
///
/// Always 200; `cancel_requested` is false when nothing was running.
pub async fn cancel_import(State(state): State<AppState>) -> Json<CancelResult> {
    Json(state.imports.cancel().await)
}

/// GET /import/status
pub async fn import_status(State(state): State<AppState>) -> Json<ImportStatus> {
    Json(state.imports.status().await)
}

/// GET /import/runs?limit=N
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> ApiResult<Json<Vec<ImportRunRecord>>> {
    let limit = query.limit.unwrap_or(DEFAULT_RUNS_LIMIT);
    if limit == 0 || limit > MAX_RUNS_LIMIT {
        return Err(ApiError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_RUNS_LIMIT
        )));
    }
    Ok(Json(import_runs::list_runs(&state.db, limit).await?))
}

/// GET /import/runs/:run_id
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<ImportRunRecord>> {
    import_runs::load_run(&state.db, run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Import run {} not found", run_id)))
}

/// Build import workflow routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import/start", post(start_import))
        .route("/import/cancel", post(cancel_import))
        .route("/import/status", get(import_status))
        .route("/import/runs", get(list_runs))
        .route("/import/runs/:run_id", get(get_run))
}
