//! Execution Orchestrator
//!
//! Resolves a connector, checks that it may run and hands it to the
//! [`SyncLifecycle`]. Every failure becomes an [`ExecutionResult`]; nothing
//! here returns an error to the caller. Calls for the same connector are
//! serialized; different connectors run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connectors::registry::Registry;
use crate::connectors::trait_::requires_credentials;
use crate::lifecycle::{LifecycleError, SyncLifecycle};
use crate::repositories::ConfigurationStore;
use crate::telemetry::ORCHESTRATOR_RESULTS_TOTAL;

/// Why an execution did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    NotFound,
    NotEnabled,
    NotConfigured,
    ExecutionError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::NotFound => "not_found",
            ErrorType::NotEnabled => "not_enabled",
            ErrorType::NotConfigured => "not_configured",
            ErrorType::ExecutionError => "execution_error",
        }
    }

    /// Precondition failures are reported as skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(self, ErrorType::NotEnabled | ErrorType::NotConfigured)
    }
}

/// Uniform result of one `execute` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExecutionResult {
    pub success: bool,
    pub connector_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
}

impl ExecutionResult {
    fn failure(
        connector_name: &str,
        error_type: ErrorType,
        error: impl Into<String>,
        sync_run_id: Option<Uuid>,
    ) -> Self {
        Self {
            success: false,
            connector_name: connector_name.to_string(),
            sync_run_id,
            data: None,
            error: Some(error.into()),
            error_type: Some(error_type),
        }
    }

    fn outcome_label(&self) -> &'static str {
        match self.error_type {
            Some(error_type) => error_type.as_str(),
            None if self.success => "success",
            None => "unsuccessful",
        }
    }
}

/// Reduction of an `execute_all` pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExecutionSummary {
    pub total: usize,
    pub successful: usize,
    /// execution errors only
    pub failed: usize,
    /// not enabled or not configured
    pub skipped: usize,
    pub results: Vec<ExecutionResult>,
}

impl ExecutionSummary {
    pub fn from_results(results: Vec<ExecutionResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let failed = results
            .iter()
            .filter(|r| r.error_type == Some(ErrorType::ExecutionError))
            .count();
        let skipped = results
            .iter()
            .filter(|r| r.error_type.is_some_and(|t| t.is_skip()))
            .count();

        Self {
            total: results.len(),
            successful,
            failed,
            skipped,
            results,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
    store: ConfigurationStore,
    lifecycle: SyncLifecycle,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Orchestrator {
    pub fn new(registry: Arc<Registry>, store: ConfigurationStore, lifecycle: SyncLifecycle) -> Self {
        Self {
            registry,
            store,
            lifecycle,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, connector_name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(connector_name.to_string()).or_default().clone()
    }

    /// Run one connector. Never fails; see [`ExecutionResult::error_type`].
    #[instrument(skip(self))]
    pub async fn execute(&self, name: &str) -> ExecutionResult {
        let result = self.execute_inner(name).await;

        counter!(
            ORCHESTRATOR_RESULTS_TOTAL,
            "connector" => result.connector_name.clone(),
            "outcome" => result.outcome_label()
        )
        .increment(1);

        match result.error_type {
            None => info!(
                connector = %result.connector_name,
                sync_run_id = ?result.sync_run_id,
                "Connector executed"
            ),
            Some(error_type) => warn!(
                connector = %result.connector_name,
                sync_run_id = ?result.sync_run_id,
                error_type = error_type.as_str(),
                error = result.error.as_deref().unwrap_or_default(),
                "Connector execution did not succeed"
            ),
        }
        result
    }

    async fn execute_inner(&self, name: &str) -> ExecutionResult {
        let Some(connector) = self.registry.find(name) else {
            return ExecutionResult::failure(
                name,
                ErrorType::NotFound,
                format!("Connector '{name}' not found"),
                None,
            );
        };
        let connector_name = connector.name().to_string();

        // Held from the precondition checks through finalization.
        let lock = self.lock_for(&connector_name);
        let _guard = lock.lock().await;

        match self.store.is_enabled(&connector_name).await {
            Ok(true) => {}
            Ok(false) => {
                return ExecutionResult::failure(
                    &connector_name,
                    ErrorType::NotEnabled,
                    format!("Connector '{connector_name}' is not enabled"),
                    None,
                );
            }
            Err(err) => {
                return ExecutionResult::failure(
                    &connector_name,
                    ErrorType::ExecutionError,
                    err.to_string(),
                    None,
                );
            }
        }

        if requires_credentials(connector.as_ref()) {
            match self.store.is_configured(&connector_name).await {
                Ok(true) => {}
                Ok(false) => {
                    return ExecutionResult::failure(
                        &connector_name,
                        ErrorType::NotConfigured,
                        format!("Connector '{connector_name}' is missing credentials"),
                        None,
                    );
                }
                Err(err) => {
                    return ExecutionResult::failure(
                        &connector_name,
                        ErrorType::ExecutionError,
                        err.to_string(),
                        None,
                    );
                }
            }
        }

        let loaded = async {
            let credentials = self.store.load_credentials(&connector_name).await?;
            let settings = self.store.load_settings(&connector_name).await?;
            Ok::<_, crate::repositories::ConfigurationErrors>((credentials, settings))
        }
        .await;
        let (credentials, settings) = match loaded {
            Ok(loaded) => loaded,
            Err(err) => {
                return ExecutionResult::failure(
                    &connector_name,
                    ErrorType::ExecutionError,
                    err.to_string(),
                    None,
                );
            }
        };

        match self.lifecycle.run(connector, credentials, settings).await {
            Ok((run, outcome)) => ExecutionResult {
                success: outcome.success,
                connector_name,
                sync_run_id: Some(run.id),
                data: outcome.data,
                error: None,
                error_type: None,
            },
            Err(err) => {
                let run_id = err.run_id();
                let message = match &err {
                    LifecycleError::ConnectorFailed { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                ExecutionResult::failure(&connector_name, ErrorType::ExecutionError, message, run_id)
            }
        }
    }

    /// `execute` for every enabled configuration, in name order.
    pub async fn execute_all(&self) -> Vec<ExecutionResult> {
        let names = match self.store.enabled_names().await {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "Could not list enabled connectors");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(names.len());
        for name in names {
            results.push(self.execute(&name).await);
        }
        results
    }

    pub async fn execute_all_with_summary(&self) -> ExecutionSummary {
        let summary = ExecutionSummary::from_results(self.execute_all().await);
        info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            skipped = summary.skipped,
            "Executed all enabled connectors"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(success: bool, error_type: Option<ErrorType>) -> ExecutionResult {
        ExecutionResult {
            success,
            connector_name: "x".to_string(),
            sync_run_id: None,
            data: None,
            error: error_type.map(|t| t.as_str().to_string()),
            error_type,
        }
    }

    #[test]
    fn summary_partitions_by_error_type() {
        let summary = ExecutionSummary::from_results(vec![
            result(true, None),
            result(false, Some(ErrorType::ExecutionError)),
            result(false, Some(ErrorType::NotEnabled)),
            result(false, Some(ErrorType::NotConfigured)),
            result(false, Some(ErrorType::NotFound)),
        ]);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 2);
    }

    #[test]
    fn result_serializes_snake_case_and_skips_absent_fields() {
        let value = serde_json::to_value(ExecutionResult::failure(
            "bank_feed",
            ErrorType::NotConfigured,
            "missing",
            None,
        ))
        .expect("serializes");
        assert_eq!(
            value,
            json!({
                "success": false,
                "connector_name": "bank_feed",
                "error": "missing",
                "error_type": "not_configured"
            })
        );
    }
}
