//! # Connector API Handlers
//!
//! Listing, configuration and execution of connectors.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::OperatorAuth;
use crate::connectors::FieldSpec;
use crate::error::{ApiError, not_found};
use crate::orchestrator::{ExecutionResult, ExecutionSummary};
use crate::repositories::ConnectorSummary;
use crate::server::AppState;

/// Summary plus the declared field schema and current (plain) settings.
#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectorDetail {
    #[serde(flatten)]
    pub summary: ConnectorSummary,
    pub credential_fields: Vec<FieldSpec>,
    pub setting_fields: Vec<FieldSpec>,
    pub settings: BTreeMap<String, String>,
}

/// Key/value payload for credential and setting writes.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfigValuesRequest {
    pub values: BTreeMap<String, String>,
}

/// Every registered connector and every stored configuration
#[utoipa::path(
    get,
    path = "/connectors",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Connector summaries", body = [ConnectorSummary]),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn list_connectors(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Result<Json<Vec<ConnectorSummary>>, ApiError> {
    Ok(Json(state.store.all_connectors_summary().await?))
}

#[utoipa::path(
    get,
    path = "/connectors/{name}",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name (case-insensitive)")),
    responses(
        (status = 200, description = "Connector detail", body = ConnectorDetail),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Unknown connector", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn get_connector(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<Json<ConnectorDetail>, ApiError> {
    let summary = state.store.summary(&name).await?;
    if !summary.registered && summary.created_at.is_none() {
        return Err(not_found(&format!("Connector '{name}' not found")));
    }

    let descriptor = state.registry.descriptor(&name);
    Ok(Json(ConnectorDetail {
        credential_fields: descriptor
            .map(|d| d.credential_fields.clone())
            .unwrap_or_default(),
        setting_fields: descriptor
            .map(|d| d.setting_fields.clone())
            .unwrap_or_default(),
        settings: state.store.load_settings(&name).await?,
        summary,
    }))
}

#[utoipa::path(
    post,
    path = "/connectors/{name}/enable",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    responses(
        (status = 200, description = "Connector enabled", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn enable_connector(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.enable(&name).await?;
    Ok(Json(state.store.summary(&name).await?))
}

#[utoipa::path(
    post,
    path = "/connectors/{name}/disable",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    responses(
        (status = 200, description = "Connector disabled", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn disable_connector(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.disable(&name).await?;
    Ok(Json(state.store.summary(&name).await?))
}

/// Overwrite the given credential keys, keeping the rest
#[utoipa::path(
    patch,
    path = "/connectors/{name}/credentials",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    request_body = ConfigValuesRequest,
    responses(
        (status = 200, description = "Credentials merged", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn merge_credentials(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
    Json(body): Json<ConfigValuesRequest>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.merge_credentials(&name, body.values).await?;
    Ok(Json(state.store.summary(&name).await?))
}

/// Replace all stored credentials
#[utoipa::path(
    put,
    path = "/connectors/{name}/credentials",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    request_body = ConfigValuesRequest,
    responses(
        (status = 200, description = "Credentials replaced", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn replace_credentials(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
    Json(body): Json<ConfigValuesRequest>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.replace_credentials(&name, body.values).await?;
    Ok(Json(state.store.summary(&name).await?))
}

#[utoipa::path(
    delete,
    path = "/connectors/{name}/credentials",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    responses(
        (status = 200, description = "Credentials cleared", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn clear_credentials(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.clear_credentials(&name).await?;
    Ok(Json(state.store.summary(&name).await?))
}

/// Overwrite the given setting keys, keeping the rest
#[utoipa::path(
    patch,
    path = "/connectors/{name}/settings",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    request_body = ConfigValuesRequest,
    responses(
        (status = 200, description = "Settings merged", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn merge_settings(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
    Json(body): Json<ConfigValuesRequest>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.merge_settings(&name, body.values).await?;
    Ok(Json(state.store.summary(&name).await?))
}

#[utoipa::path(
    put,
    path = "/connectors/{name}/settings",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    request_body = ConfigValuesRequest,
    responses(
        (status = 200, description = "Settings replaced", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn replace_settings(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
    Json(body): Json<ConfigValuesRequest>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.replace_settings(&name, body.values).await?;
    Ok(Json(state.store.summary(&name).await?))
}

#[utoipa::path(
    delete,
    path = "/connectors/{name}/settings",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    responses(
        (status = 200, description = "Settings cleared", body = ConnectorSummary),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "connectors"
)]
pub async fn clear_settings(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
) -> Result<Json<ConnectorSummary>, ApiError> {
    state.store.clear_settings(&name).await?;
    Ok(Json(state.store.summary(&name).await?))
}

/// Run one connector now. Failures are reported in the body, not the status.
#[utoipa::path(
    post,
    path = "/connectors/{name}/execute",
    security(("bearer_auth" = [])),
    params(("name" = String, Path, description = "Connector name")),
    responses(
        (status = 200, description = "Execution result", body = ExecutionResult),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "execution"
)]
pub async fn execute_connector(
    State(state): State<AppState>,
    _auth: OperatorAuth,
    Path(name): Path<String>,
) -> Json<ExecutionResult> {
    Json(state.orchestrator.execute(&name).await)
}

/// Run every enabled connector in name order
#[utoipa::path(
    post,
    path = "/connectors/execute-all",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Execution summary", body = ExecutionSummary),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "execution"
)]
pub async fn execute_all(
    State(state): State<AppState>,
    _auth: OperatorAuth,
) -> Json<ExecutionSummary> {
    Json(state.orchestrator.execute_all_with_summary().await)
}
