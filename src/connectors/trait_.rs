//! Connector trait definition
//!
//! Defines the interface every connector implements: identity, the declared
//! credential and setting schema, and a single `sync` operation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::AuditError;
use crate::connectors::fetch::FetchError;
use crate::crypto::Credentials;
use crate::repositories::RepositoryError;

/// Plain (unencrypted) connector settings.
pub type Settings = BTreeMap<String, String>;

/// Input control a configuration form renders for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Password,
    Number,
    Date,
    Email,
}

/// Declared credential or setting field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    /// An optional field with no placeholder or description.
    pub fn new(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: false,
            placeholder: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Everything a connector receives for one sync run.
#[derive(Clone)]
pub struct SyncContext {
    pub connector_name: String,
    pub sync_run_id: Uuid,
    pub credentials: Credentials,
    pub settings: Settings,
    pub db: DatabaseConnection,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("connector_name", &self.connector_name)
            .field("sync_run_id", &self.sync_run_id)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn require_credential(&self, key: &str) -> Result<&str, ConnectorError> {
        self.credential(key)
            .ok_or_else(|| ConnectorError::MissingCredential {
                field: key.to_string(),
            })
    }
}

/// Result of a successful `sync` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SyncOutcome {
    pub success: bool,
    #[serde(default)]
    pub records_processed: u32,
    #[serde(default)]
    pub records_created: u32,
    #[serde(default)]
    pub records_updated: u32,
    /// Connector-specific extra payload (fetched dates, account metadata ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<JsonValue>,
}

impl SyncOutcome {
    /// A successful outcome with all counts at zero.
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: JsonValue) -> Self {
        self.data = Some(data);
        self
    }
}

/// Everything a connector's `sync` can fail with.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Storage(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("missing credential '{field}'")]
    MissingCredential { field: String },
    #[error("invalid feed data: {0}")]
    InvalidData(String),
    #[error("{0}")]
    Failed(String),
}

/// A pluggable data source.
///
/// Every member is required; an implementation that leaves one out is
/// rejected at compile time with the member and the type named.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Unique, lower-case identifier used for lookup and attribution.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// Credentials the connector needs; stored encrypted.
    fn credential_fields(&self) -> Vec<FieldSpec>;

    /// Plain settings the connector understands.
    fn setting_fields(&self) -> Vec<FieldSpec>;

    /// Pull external records into local storage.
    async fn sync(&self, ctx: SyncContext) -> Result<SyncOutcome, ConnectorError>;
}

/// True iff the connector declares at least one required credential field.
pub fn requires_credentials(connector: &dyn Connector) -> bool {
    connector.credential_fields().iter().any(|field| field.required)
}
