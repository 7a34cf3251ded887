//! SyncRun entity model
//!
//! This module contains the SeaORM entity model for the sync_runs table,
//! which records every invocation of a connector's sync.

use std::fmt;
use std::str::FromStr;

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SyncRun entity representing a single connector invocation
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_runs")]
pub struct Model {
    /// Unique identifier for the run (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Name of the connector that was invoked
    pub connector_name: String,

    /// Lifecycle status (pending, running, completed, failed)
    pub status: String,

    /// Timestamp when the run was created
    pub started_at: DateTimeWithTimeZone,

    /// Timestamp when the run reached a terminal status
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub records_processed: i32,
    pub records_created: i32,
    pub records_updated: i32,

    /// Failure message for failed runs
    pub error_message: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Parsed status; unknown strings are treated as failed.
    pub fn status(&self) -> SyncRunStatus {
        self.status.parse().unwrap_or(SyncRunStatus::Failed)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Run states. Transitions only move forward; completed and failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    pub const UNFINISHED: [SyncRunStatus; 2] = [SyncRunStatus::Pending, SyncRunStatus::Running];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Pending => "pending",
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncRunStatus::Completed | SyncRunStatus::Failed)
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncRunStatus::Pending),
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "failed" => Ok(SyncRunStatus::Failed),
            other => Err(format!("unknown sync run status: {other}")),
        }
    }
}
