//! ConnectorConfiguration entity model
//!
//! One row per connector name. Credentials are persisted only as an
//! AES-GCM envelope; settings are a plain JSON object.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

use crate::crypto::is_encrypted_payload;

/// Persisted per-connector state
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "connector_configurations")]
pub struct Model {
    /// Normalized connector name (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub connector_name: String,

    /// Whether the orchestrator may run this connector
    pub enabled: bool,

    /// Encrypted credential map, absent when no credentials are stored
    #[sea_orm(column_type = "VarBinary(StringLen::None)", nullable)]
    pub credentials_ciphertext: Option<Vec<u8>>,

    /// Plain settings object
    #[sea_orm(column_type = "JsonBinary")]
    pub settings: JsonValue,

    /// Timestamp when the configuration was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the configuration was last updated
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// True iff a well-formed credential envelope is stored.
    pub fn has_credentials(&self) -> bool {
        self.credentials_ciphertext
            .as_deref()
            .is_some_and(is_encrypted_payload)
    }

    /// True iff the settings object holds at least one key.
    pub fn has_settings(&self) -> bool {
        self.settings.as_object().is_some_and(|map| !map.is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
