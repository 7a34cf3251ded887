//! # Connector Configuration Store
//!
//! Per-connector enabled flag, encrypted credentials and plain settings.
//! Rows are created lazily by the first write and never deleted. Every write
//! goes through one read-modify-write path that diffs the old and new state,
//! persists only when something changed, and records the change in the audit
//! log inside the same transaction. Credential values never reach the audit
//! log; a changed credential map is recorded as `[FILTERED]`.
//!
//! Mutations report failures as a [`ConfigurationErrors`] list instead of
//! panicking or bubbling raw database errors.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

use crate::audit::{AuditError, AuditLog, ChangeSet};
use crate::connectors::registry::{Registry, normalize_name};
use crate::connectors::trait_::Settings;
use crate::crypto::{CryptoError, CryptoKey, Credentials, open_credentials, seal_credentials};
use crate::models::connector_configuration::{ActiveModel, Column, Entity, Model};

pub const TARGET_TYPE: &str = "ConnectorConfiguration";
const FILTERED: &str = "[FILTERED]";
const MAX_NAME_LEN: usize = 64;

/// One failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Validation errors returned by configuration mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, ToSchema)]
#[error("{}", join_messages(&self.errors))]
pub struct ConfigurationErrors {
    pub errors: Vec<ValidationError>,
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConfigurationErrors {
    pub fn single(field: &str, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ValidationError {
                field: field.to_string(),
                message: message.into(),
            }],
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }
}

impl From<DbErr> for ConfigurationErrors {
    fn from(err: DbErr) -> Self {
        Self::single("base", format!("could not be saved: {err}"))
    }
}

impl From<AuditError> for ConfigurationErrors {
    fn from(err: AuditError) -> Self {
        Self::single("base", format!("could not be audited: {err}"))
    }
}

impl From<CryptoError> for ConfigurationErrors {
    fn from(err: CryptoError) -> Self {
        Self::single("credentials", format!("could not be processed: {err}"))
    }
}

/// Display view of one connector and its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ConnectorSummary {
    pub name: String,
    /// Empty when the configuration belongs to a connector that is not registered
    pub version: String,
    pub description: String,
    pub registered: bool,
    pub enabled: bool,
    pub configured: bool,
    pub requires_credentials: bool,
    pub has_settings: bool,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub created_at: Option<DateTimeWithTimeZone>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub updated_at: Option<DateTimeWithTimeZone>,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Draft {
    enabled: bool,
    credentials_ciphertext: Option<Vec<u8>>,
    settings: Settings,
}

impl Draft {
    fn from_model(model: &Model) -> Self {
        Self {
            enabled: model.enabled,
            credentials_ciphertext: model.credentials_ciphertext.clone(),
            settings: settings_from_json(&model.settings),
        }
    }

    fn diff(&self, after: &Draft) -> ChangeSet {
        let mut changes = ChangeSet::new()
            .track("enabled", self.enabled, after.enabled)
            .track(
                "settings",
                settings_to_json(&self.settings),
                settings_to_json(&after.settings),
            );

        if self.credentials_ciphertext != after.credentials_ciphertext {
            let filtered = |blob: &Option<Vec<u8>>| match blob {
                Some(_) => JsonValue::from(FILTERED),
                None => JsonValue::Null,
            };
            changes = changes.force(
                "credentials",
                filtered(&self.credentials_ciphertext),
                filtered(&after.credentials_ciphertext),
            );
        }

        changes
    }
}

fn settings_from_json(value: &JsonValue) -> Settings {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| {
                    let value = match value {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (key.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn settings_to_json(settings: &Settings) -> JsonValue {
    JsonValue::Object(
        settings
            .iter()
            .map(|(key, value)| (key.clone(), JsonValue::String(value.clone())))
            .collect(),
    )
}

fn validate_name(name: &str) -> Result<String, ConfigurationErrors> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return Err(ConfigurationErrors::single("connector_name", "can't be blank"));
    }
    if normalized.len() > MAX_NAME_LEN {
        return Err(ConfigurationErrors::single(
            "connector_name",
            format!("is too long (maximum is {MAX_NAME_LEN} characters)"),
        ));
    }
    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConfigurationErrors::single(
            "connector_name",
            "may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(normalized)
}

fn validate_keys<'a>(
    field: &str,
    keys: impl IntoIterator<Item = &'a String>,
) -> Result<(), ConfigurationErrors> {
    let errors: Vec<ValidationError> = keys
        .into_iter()
        .filter(|key| key.trim().is_empty())
        .map(|_| ValidationError {
            field: field.to_string(),
            message: "contain a blank key".to_string(),
        })
        .take(1)
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigurationErrors { errors })
    }
}

/// Persistent per-connector configuration.
#[derive(Clone)]
pub struct ConfigurationStore {
    db: DatabaseConnection,
    key: CryptoKey,
    registry: Arc<Registry>,
}

impl ConfigurationStore {
    pub fn new(db: DatabaseConnection, key: CryptoKey, registry: Arc<Registry>) -> Self {
        Self { db, key, registry }
    }

    pub async fn find(&self, name: &str) -> Result<Option<Model>, ConfigurationErrors> {
        let name = validate_name(name)?;
        Ok(Entity::find_by_id(name).one(&self.db).await?)
    }

    pub async fn enable(&self, name: &str) -> Result<Model, ConfigurationErrors> {
        self.mutate(name, |_, draft| {
            draft.enabled = true;
            Ok(())
        })
        .await
    }

    pub async fn disable(&self, name: &str) -> Result<Model, ConfigurationErrors> {
        self.mutate(name, |_, draft| {
            draft.enabled = false;
            Ok(())
        })
        .await
    }

    /// Overwrite only the given credential keys, keeping the others.
    pub async fn merge_credentials(
        &self,
        name: &str,
        partial: Credentials,
    ) -> Result<Model, ConfigurationErrors> {
        validate_keys("credentials", partial.keys())?;
        let key = self.key.clone();
        self.mutate(name, move |name, draft| {
            let current = open_credentials(&key, name, draft.credentials_ciphertext.as_deref())?;
            let mut merged = current.clone();
            merged.extend(partial);
            if merged != current {
                draft.credentials_ciphertext = seal_credentials(&key, name, &merged)?;
            }
            Ok(())
        })
        .await
    }

    /// Discard all stored credentials and store `full` instead.
    pub async fn replace_credentials(
        &self,
        name: &str,
        full: Credentials,
    ) -> Result<Model, ConfigurationErrors> {
        validate_keys("credentials", full.keys())?;
        let key = self.key.clone();
        self.mutate(name, move |name, draft| {
            let current = open_credentials(&key, name, draft.credentials_ciphertext.as_deref())
                .unwrap_or_default();
            if full != current || draft.credentials_ciphertext.is_none() != full.is_empty() {
                draft.credentials_ciphertext = seal_credentials(&key, name, &full)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn clear_credentials(&self, name: &str) -> Result<Model, ConfigurationErrors> {
        self.mutate(name, |_, draft| {
            draft.credentials_ciphertext = None;
            Ok(())
        })
        .await
    }

    /// Overwrite only the given setting keys, keeping the others.
    pub async fn merge_settings(
        &self,
        name: &str,
        partial: Settings,
    ) -> Result<Model, ConfigurationErrors> {
        validate_keys("settings", partial.keys())?;
        self.mutate(name, move |_, draft| {
            draft.settings.extend(partial);
            Ok(())
        })
        .await
    }

    pub async fn replace_settings(
        &self,
        name: &str,
        full: Settings,
    ) -> Result<Model, ConfigurationErrors> {
        validate_keys("settings", full.keys())?;
        self.mutate(name, move |_, draft| {
            draft.settings = full;
            Ok(())
        })
        .await
    }

    pub async fn clear_settings(&self, name: &str) -> Result<Model, ConfigurationErrors> {
        self.mutate(name, |_, draft| {
            draft.settings.clear();
            Ok(())
        })
        .await
    }

    pub async fn is_enabled(&self, name: &str) -> Result<bool, ConfigurationErrors> {
        Ok(self.find(name).await?.is_some_and(|config| config.enabled))
    }

    /// True iff a non-empty credential envelope is stored.
    pub async fn is_configured(&self, name: &str) -> Result<bool, ConfigurationErrors> {
        Ok(self
            .find(name)
            .await?
            .is_some_and(|config| config.has_credentials()))
    }

    /// Decrypted credentials; empty when nothing is stored.
    pub async fn load_credentials(&self, name: &str) -> Result<Credentials, ConfigurationErrors> {
        let normalized = validate_name(name)?;
        match Entity::find_by_id(normalized.clone()).one(&self.db).await? {
            Some(config) => Ok(open_credentials(
                &self.key,
                &normalized,
                config.credentials_ciphertext.as_deref(),
            )?),
            None => Ok(Credentials::new()),
        }
    }

    pub async fn load_settings(&self, name: &str) -> Result<Settings, ConfigurationErrors> {
        Ok(self
            .find(name)
            .await?
            .map(|config| settings_from_json(&config.settings))
            .unwrap_or_default())
    }

    /// Names of every enabled configuration, sorted.
    pub async fn enabled_names(&self) -> Result<Vec<String>, ConfigurationErrors> {
        Ok(Entity::find()
            .filter(Column::Enabled.eq(true))
            .order_by_asc(Column::ConnectorName)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|config| config.connector_name)
            .collect())
    }

    pub async fn summary(&self, name: &str) -> Result<ConnectorSummary, ConfigurationErrors> {
        let normalized = validate_name(name)?;
        let config = Entity::find_by_id(normalized.clone()).one(&self.db).await?;
        Ok(self.summarize(&normalized, config.as_ref()))
    }

    /// Every registered connector plus any configuration whose connector is
    /// no longer registered, sorted by name.
    pub async fn all_connectors_summary(&self) -> Result<Vec<ConnectorSummary>, ConfigurationErrors> {
        let configs = Entity::find().all(&self.db).await?;

        let mut names: BTreeSet<String> = self.registry.names_only().into_iter().collect();
        names.extend(configs.iter().map(|c| c.connector_name.clone()));

        Ok(names
            .iter()
            .map(|name| {
                let config = configs.iter().find(|c| &c.connector_name == name);
                self.summarize(name, config)
            })
            .collect())
    }

    fn summarize(&self, name: &str, config: Option<&Model>) -> ConnectorSummary {
        let descriptor = self.registry.descriptor(name);
        ConnectorSummary {
            name: name.to_string(),
            version: descriptor.map(|d| d.version.clone()).unwrap_or_default(),
            description: descriptor.map(|d| d.description.clone()).unwrap_or_default(),
            registered: descriptor.is_some(),
            enabled: config.is_some_and(|c| c.enabled),
            configured: config.is_some_and(Model::has_credentials),
            requires_credentials: descriptor.is_some_and(|d| d.requires_credentials()),
            has_settings: config.is_some_and(Model::has_settings),
            created_at: config.map(|c| c.created_at),
            updated_at: config.map(|c| c.updated_at),
        }
    }

    async fn mutate<F>(&self, name: &str, apply: F) -> Result<Model, ConfigurationErrors>
    where
        F: FnOnce(&str, &mut Draft) -> Result<(), ConfigurationErrors>,
    {
        let name = validate_name(name)?;
        let txn = self.db.begin().await?;

        let existing = Entity::find_by_id(name.clone()).one(&txn).await?;
        let before = existing.as_ref().map(Draft::from_model).unwrap_or_default();
        let mut after = before.clone();
        apply(&name, &mut after)?;

        let now = Utc::now().fixed_offset();
        let saved = match existing {
            None => {
                let created = ActiveModel {
                    connector_name: Set(name.clone()),
                    enabled: Set(after.enabled),
                    credentials_ciphertext: Set(after.credentials_ciphertext),
                    settings: Set(settings_to_json(&after.settings)),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
                AuditLog::record_create(&txn, TARGET_TYPE, &name).await?;
                info!(connector = %name, "Connector configuration created");
                created
            }
            Some(current) => {
                let changes = before.diff(&after);
                if changes.is_empty() {
                    txn.commit().await?;
                    return Ok(current);
                }

                let mut active: ActiveModel = current.into();
                active.enabled = Set(after.enabled);
                active.credentials_ciphertext = Set(after.credentials_ciphertext);
                active.settings = Set(settings_to_json(&after.settings));
                active.updated_at = Set(now);
                let updated = active.update(&txn).await?;

                AuditLog::record_update(&txn, TARGET_TYPE, &name, &changes).await?;
                info!(
                    connector = %name,
                    fields = ?changes.fields().collect::<Vec<_>>(),
                    "Connector configuration updated"
                );
                updated
            }
        };

        txn.commit().await?;
        Ok(saved)
    }
}
