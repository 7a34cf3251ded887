//! AuditLogEntry entity model
//!
//! Append-only record of a tracked mutation. Rows are written once by
//! [`crate::audit::AuditLog`] and never updated.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_log_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Kind of record that was mutated (e.g. "ExchangeRate")
    pub target_type: String,

    /// Identifier of the mutated record
    pub target_id: String,

    /// create, update or destroy
    pub action: String,

    /// Connector name, or "user" for changes made outside a sync run
    pub source: String,

    /// Per-field {from, to} for updates, final state for destroys
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub changes: Option<JsonValue>,

    /// Correlating sync run, absent for user-originated changes
    pub sync_run_id: Option<Uuid>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Destroy,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Destroy => "destroy",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "destroy" => Ok(AuditAction::Destroy),
            other => Err(format!("unknown audit action: {other}")),
        }
    }
}
