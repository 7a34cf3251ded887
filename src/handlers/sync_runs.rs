//! # Sync Run API Handlers
//!
//! Run history, per-connector statistics and the manual orphan sweep.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::connectors::registry::normalize_name;
use crate::error::{ApiError, not_found};
use crate::handlers::audit::AuditEntryInfo;
use crate::lifecycle::RunStats;
use crate::models::sync_run::Model as SyncRun;
use crate::server::AppState;

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 200;

/// Query parameters for bounded listings
#[derive(Debug, Deserialize, IntoParams)]
pub struct LimitQuery {
    /// Maximum number of items to return (default: 20, max: 200)
    pub limit: Option<u64>,
}

impl LimitQuery {
    pub fn resolve(&self) -> Result<u64, ApiError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "VALIDATION_FAILED",
                &format!("limit must be between 1 and {MAX_LIMIT}"),
            ));
        }
        Ok(limit)
    }
}

/// Sync run as returned by the API
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncRunInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub connector_name: String,
    #[schema(example = "completed")]
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub records_processed: i32,
    pub records_created: i32,
    pub records_updated: i32,
    pub error_message: Option<String>,
}

impl From<SyncRun> for SyncRunInfo {
    fn from(run: SyncRun) -> Self {
        Self {
            id: run.id,
            connector_name: run.connector_name,
            status: run.status,
            started_at: run.started_at.to_rfc3339(),
            completed_at: run.completed_at.map(|at| at.to_rfc3339()),
            records_processed: run.records_processed,
            records_created: run.records_created,
            records_updated: run.records_updated,
            error_message: run.error_message,
        }
    }
}

/// One run with every audit entry it produced
#[derive(Debug, Serialize, ToSchema)]
pub struct SyncRunDetail {
    pub run: SyncRunInfo,
    pub changes: Vec<AuditEntryInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SweepResponse {
    /// Number of runs force-failed
    pub swept: u64,
}

#[utoipa::path(
    get,
    path = "/connectors/{name}/runs",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name"), LimitQuery),
    responses(
        (status = 200, description = "Runs, newest first", body = [SyncRunInfo]),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "sync_runs"
)]
pub async fn list_runs(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<SyncRunInfo>>, ApiError> {
    let limit = query.resolve()?;
    let runs = state
        .recorder
        .recent_runs(Some(&normalize_name(&name)), limit)
        .await?;
    Ok(Json(runs.into_iter().map(SyncRunInfo::from).collect()))
}

#[utoipa::path(
    get,
    path = "/connectors/{name}/runs/stats",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    responses(
        (status = 200, description = "Run statistics", body = RunStats),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "sync_runs"
)]
pub async fn run_stats(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<Json<RunStats>, ApiError> {
    Ok(Json(state.recorder.stats(&normalize_name(&name)).await?))
}

#[utoipa::path(
    get,
    path = "/sync-runs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Sync run id")),
    responses(
        (status = 200, description = "Run and its changes", body = SyncRunDetail),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown run", body = ApiError)
    ),
    tag = "sync_runs"
)]
pub async fn get_run(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncRunDetail>, ApiError> {
    let run = state
        .recorder
        .find(id)
        .await?
        .ok_or_else(|| not_found(&format!("sync run {id} not found")))?;
    let changes = state.audit.entries_for_run(id).await?;

    Ok(Json(SyncRunDetail {
        run: run.into(),
        changes: changes.into_iter().map(AuditEntryInfo::from).collect(),
    }))
}

/// Force-fail runs stuck past the configured orphan threshold
#[utoipa::path(
    post,
    path = "/sync-runs/sweep",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Sweep result", body = SweepResponse),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "sync_runs"
)]
pub async fn sweep_orphans(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<SweepResponse>, ApiError> {
    let swept = state
        .recorder
        .sweep_orphaned_runs(state.config.sync.orphan_threshold())
        .await?;
    Ok(Json(SweepResponse { swept }))
}
