//! # API Handlers
//!
//! HTTP endpoint handlers for the administrative API.

use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};
use tracing::warn;

pub mod audit;
pub mod connectors;
pub mod sync_runs;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Readiness probe; fails with 503 while the database is unreachable.
#[utoipa::path(
    get,
    path = "/readyz",
    responses(
        (status = 200, description = "Database reachable"),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn readyz(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    crate::db::health_check(&state.db).await.map_err(|err| {
        warn!(error = %err, "Readiness check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "database unavailable",
        )
    })?;
    Ok(Json(json!({ "status": "ready" })))
}
