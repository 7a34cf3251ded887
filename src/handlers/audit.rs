//! # Audit API Handlers

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditLog, AuditStats};
use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::handlers::sync_runs::LimitQuery;
use crate::models::audit_log_entry::Model as AuditLogEntry;
use crate::server::AppState;

/// Audit entry as returned by the API
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditEntryInfo {
    #[schema(value_type = String)]
    pub id: Uuid,
    pub target_type: String,
    pub target_id: String,
    #[schema(example = "update")]
    pub action: String,
    pub source: String,
    #[schema(value_type = Option<Object>)]
    pub changes: Option<JsonValue>,
    #[schema(value_type = Option<String>)]
    pub sync_run_id: Option<Uuid>,
    pub created_at: String,
    /// One-line summary, e.g. `updated ExchangeRate 42 (rate)`
    pub description: String,
}

impl From<AuditLogEntry> for AuditEntryInfo {
    fn from(entry: AuditLogEntry) -> Self {
        let description = AuditLog::describe(&entry);
        Self {
            id: entry.id,
            target_type: entry.target_type,
            target_id: entry.target_id,
            action: entry.action,
            source: entry.source,
            changes: entry.changes,
            sync_run_id: entry.sync_run_id,
            created_at: entry.created_at.to_rfc3339(),
            description,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunAuditGroup {
    #[schema(value_type = String)]
    pub sync_run_id: Uuid,
    pub entries: Vec<AuditEntryInfo>,
}

/// Change statistics for a connector name or `user`
#[utoipa::path(
    get,
    path = "/audit/stats/{source}",
    security(("bearer_auth" = [])),
    params(("source" = String, Path, description = "Connector name or \"user\"")),
    responses(
        (status = 200, description = "Audit statistics", body = AuditStats),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "audit"
)]
pub async fn source_stats(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(source): Path<String>,
) -> Result<Json<AuditStats>, ApiError> {
    Ok(Json(state.audit.stats_for(&source).await?))
}

#[utoipa::path(
    get,
    path = "/audit/history/{target_type}/{target_id}",
    security(("bearer_auth" = [])),
    params(
        ("target_type" = String, Path, description = "Record type, e.g. ExchangeRate"),
        ("target_id" = String, Path, description = "Record id")
    ),
    responses(
        (status = 200, description = "Entries, oldest first", body = [AuditEntryInfo]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "audit"
)]
pub async fn target_history(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path((target_type, target_id)): Path<(String, String)>,
) -> Result<Json<Vec<AuditEntryInfo>>, ApiError> {
    let entries = state.audit.history_for(&target_type, &target_id).await?;
    Ok(Json(entries.into_iter().map(AuditEntryInfo::from).collect()))
}

/// Most recent run-correlated entries grouped by run
#[utoipa::path(
    get,
    path = "/audit/runs",
    security(("bearer_auth" = [])),
    params(LimitQuery),
    responses(
        (status = 200, description = "Entries grouped by run", body = [RunAuditGroup]),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "audit"
)]
pub async fn recent_by_run(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<RunAuditGroup>>, ApiError> {
    let grouped = state.audit.recent_grouped_by_run(query.resolve()?).await?;
    Ok(Json(
        grouped
            .into_iter()
            .map(|(sync_run_id, entries)| RunAuditGroup {
                sync_run_id,
                entries: entries.into_iter().map(AuditEntryInfo::from).collect(),
            })
            .collect(),
    ))
}
