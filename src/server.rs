//! # Server Configuration
//!
//! Router, shared state and OpenAPI document for the administrative API.

use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::audit::AuditLog;
use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::connectors::registry::Registry;
use crate::crypto::CryptoKey;
use crate::handlers;
use crate::lifecycle::{LifecycleRecorder, SyncLifecycle};
use crate::orchestrator::Orchestrator;
use crate::repositories::ConfigurationStore;
use crate::sweeper::OrphanSweeper;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub registry: Arc<Registry>,
    pub store: ConfigurationStore,
    pub orchestrator: Orchestrator,
    pub recorder: LifecycleRecorder,
    pub audit: AuditLog,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        db: DatabaseConnection,
        registry: Arc<Registry>,
        key: CryptoKey,
    ) -> Self {
        let store = ConfigurationStore::new(db.clone(), key, Arc::clone(&registry));
        let lifecycle = SyncLifecycle::new(db.clone());
        let recorder = lifecycle.recorder().clone();
        let orchestrator = Orchestrator::new(Arc::clone(&registry), store.clone(), lifecycle);

        Self {
            config,
            audit: AuditLog::new(db.clone()),
            db,
            registry,
            store,
            orchestrator,
            recorder,
        }
    }
}

impl FromRef<AppState> for Arc<AppConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        Arc::clone(&app_state.config)
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let operator_routes = Router::new()
        .route("/connectors", get(handlers::connectors::list_connectors))
        .route(
            "/connectors/execute-all",
            post(handlers::connectors::execute_all),
        )
        .route("/connectors/{name}", get(handlers::connectors::get_connector))
        .route(
            "/connectors/{name}/enable",
            post(handlers::connectors::enable_connector),
        )
        .route(
            "/connectors/{name}/disable",
            post(handlers::connectors::disable_connector),
        )
        .route(
            "/connectors/{name}/credentials",
            axum::routing::patch(handlers::connectors::merge_credentials)
                .put(handlers::connectors::replace_credentials)
                .delete(handlers::connectors::clear_credentials),
        )
        .route(
            "/connectors/{name}/settings",
            axum::routing::patch(handlers::connectors::merge_settings)
                .put(handlers::connectors::replace_settings)
                .delete(handlers::connectors::clear_settings),
        )
        .route(
            "/connectors/{name}/execute",
            post(handlers::connectors::execute_connector),
        )
        .route(
            "/connectors/{name}/runs",
            get(handlers::sync_runs::list_runs),
        )
        .route(
            "/connectors/{name}/runs/stats",
            get(handlers::sync_runs::run_stats),
        )
        .route("/sync-runs/sweep", post(handlers::sync_runs::sweep_orphans))
        .route("/sync-runs/{id}", get(handlers::sync_runs::get_run))
        .route("/audit/stats/{source}", get(handlers::audit::source_stats))
        .route(
            "/audit/history/{target_type}/{target_id}",
            get(handlers::audit::target_history),
        )
        .route("/audit/runs", get(handlers::audit::recent_by_run))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/readyz", get(handlers::readyz))
        .merge(operator_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Starts the server and the orphan sweeper; returns after Ctrl-C.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let shutdown = CancellationToken::new();

    let sweeper = OrphanSweeper::new(state.recorder.clone(), &state.config.sync);
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown.clone()));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %state.config.profile, "Server listening");

    let app = create_app(state);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Could not listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper_handle.await {
        tracing::error!(error = %err, "Orphan sweeper task failed");
    }
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::readyz,
        crate::handlers::connectors::list_connectors,
        crate::handlers::connectors::get_connector,
        crate::handlers::connectors::enable_connector,
        crate::handlers::connectors::disable_connector,
        crate::handlers::connectors::merge_credentials,
        crate::handlers::connectors::replace_credentials,
        crate::handlers::connectors::clear_credentials,
        crate::handlers::connectors::merge_settings,
        crate::handlers::connectors::replace_settings,
        crate::handlers::connectors::clear_settings,
        crate::handlers::connectors::execute_connector,
        crate::handlers::connectors::execute_all,
        crate::handlers::sync_runs::list_runs,
        crate::handlers::sync_runs::run_stats,
        crate::handlers::sync_runs::get_run,
        crate::handlers::sync_runs::sweep_orphans,
        crate::handlers::audit::source_stats,
        crate::handlers::audit::target_history,
        crate::handlers::audit::recent_by_run,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::repositories::ConnectorSummary,
            crate::repositories::ConfigurationErrors,
            crate::repositories::ValidationError,
            crate::connectors::FieldSpec,
            crate::connectors::FieldType,
            crate::orchestrator::ExecutionResult,
            crate::orchestrator::ExecutionSummary,
            crate::orchestrator::ErrorType,
            crate::lifecycle::RunStats,
            crate::audit::AuditStats,
            crate::handlers::connectors::ConnectorDetail,
            crate::handlers::connectors::ConfigValuesRequest,
            crate::handlers::sync_runs::SyncRunInfo,
            crate::handlers::sync_runs::SyncRunDetail,
            crate::handlers::sync_runs::SweepResponse,
            crate::handlers::audit::AuditEntryInfo,
            crate::handlers::audit::RunAuditGroup,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Billing Sync API",
        description = "Administrative API for billing data connectors",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
