//! Append-only audit log writer and queries.
//!
//! Writers take any [`ConnectionTrait`] so the entry lands in the same
//! transaction as the mutation it describes. Attribution is read from the
//! active [`AuditContext`]; callers never pass a source explicitly.

use std::collections::{BTreeMap, HashMap};

use chrono::{NaiveTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::context::AuditContext;
use crate::models::audit_log_entry::{ActiveModel, AuditAction, Column, Entity, Model};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log database error: {0}")]
    Database(#[from] DbErr),
}

/// Before/after values of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldChange {
    #[schema(value_type = Object)]
    pub from: JsonValue,
    #[schema(value_type = Object)]
    pub to: JsonValue,
}

/// Per-field diff of an update. Only fields whose value actually changed are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeSet(BTreeMap<String, FieldChange>);

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `field` if `from` and `to` differ.
    pub fn track<T>(mut self, field: &str, from: T, to: T) -> Self
    where
        T: Into<JsonValue> + PartialEq,
    {
        if from != to {
            self.0.insert(
                field.to_string(),
                FieldChange {
                    from: from.into(),
                    to: to.into(),
                },
            );
        }
        self
    }

    /// Record `field` without comparing, for values that are never held in the clear.
    pub fn force<T: Into<JsonValue>>(mut self, field: &str, from: T, to: T) -> Self {
        self.0.insert(
            field.to_string(),
            FieldChange {
                from: from.into(),
                to: to.into(),
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, field: &str) -> Option<&FieldChange> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.0
                .iter()
                .map(|(field, change)| {
                    (
                        field.clone(),
                        serde_json::json!({ "from": change.from, "to": change.to }),
                    )
                })
                .collect(),
        )
    }
}

/// Aggregate view of everything one source has changed.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AuditStats {
    pub source: String,
    pub total_changes: u64,
    pub creates: u64,
    pub updates: u64,
    pub destroys: u64,
    pub distinct_affected_records: u64,
    pub distinct_affected_types: u64,
    pub changes_today: u64,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_change: Option<DateTimeWithTimeZone>,
}

/// Read side of the audit log plus the associated writers.
#[derive(Clone)]
pub struct AuditLog {
    db: DatabaseConnection,
}

impl AuditLog {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Record that a new record was created.
    pub async fn record_create<C: ConnectionTrait>(
        conn: &C,
        target_type: &str,
        target_id: &str,
    ) -> Result<Model, AuditError> {
        Self::append(conn, target_type, target_id, AuditAction::Create, None).await
    }

    /// Record an update. Callers skip the write entirely when `changes` is empty.
    pub async fn record_update<C: ConnectionTrait>(
        conn: &C,
        target_type: &str,
        target_id: &str,
        changes: &ChangeSet,
    ) -> Result<Model, AuditError> {
        Self::append(
            conn,
            target_type,
            target_id,
            AuditAction::Update,
            Some(changes.to_json()),
        )
        .await
    }

    /// Record a deletion, preserving the record's final state.
    pub async fn record_destroy<C: ConnectionTrait>(
        conn: &C,
        target_type: &str,
        target_id: &str,
        final_state: JsonValue,
    ) -> Result<Model, AuditError> {
        Self::append(
            conn,
            target_type,
            target_id,
            AuditAction::Destroy,
            Some(final_state),
        )
        .await
    }

    async fn append<C: ConnectionTrait>(
        conn: &C,
        target_type: &str,
        target_id: &str,
        action: AuditAction,
        changes: Option<JsonValue>,
    ) -> Result<Model, AuditError> {
        let context = AuditContext::current();

        let entry = ActiveModel {
            id: Set(Uuid::new_v4()),
            target_type: Set(target_type.to_string()),
            target_id: Set(target_id.to_string()),
            action: Set(action.as_str().to_string()),
            source: Set(context.source().to_string()),
            changes: Set(changes),
            sync_run_id: Set(context.sync_run_id()),
            created_at: Set(Utc::now().fixed_offset()),
        }
        .insert(conn)
        .await?;

        tracing::debug!(
            target_type,
            target_id,
            action = %action,
            source = context.source(),
            sync_run_id = ?context.sync_run_id(),
            "Audit entry recorded"
        );

        Ok(entry)
    }

    /// Every entry for one record, oldest first.
    pub async fn history_for(
        &self,
        target_type: &str,
        target_id: &str,
    ) -> Result<Vec<Model>, AuditError> {
        Ok(Entity::find()
            .filter(Column::TargetType.eq(target_type))
            .filter(Column::TargetId.eq(target_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// Aggregate statistics for a connector name or `"user"`.
    pub async fn stats_for(&self, source: &str) -> Result<AuditStats, AuditError> {
        let by_source = || Entity::find().filter(Column::Source.eq(source));

        let total_changes = by_source().count(&self.db).await?;
        let creates = by_source()
            .filter(Column::Action.eq(AuditAction::Create.as_str()))
            .count(&self.db)
            .await?;
        let updates = by_source()
            .filter(Column::Action.eq(AuditAction::Update.as_str()))
            .count(&self.db)
            .await?;
        let destroys = by_source()
            .filter(Column::Action.eq(AuditAction::Destroy.as_str()))
            .count(&self.db)
            .await?;

        let distinct_affected_records = by_source()
            .select_only()
            .column(Column::TargetType)
            .column(Column::TargetId)
            .distinct()
            .count(&self.db)
            .await?;
        let distinct_affected_types = by_source()
            .select_only()
            .column(Column::TargetType)
            .distinct()
            .count(&self.db)
            .await?;

        let start_of_day = Utc::now()
            .date_naive()
            .and_time(NaiveTime::MIN)
            .and_utc()
            .fixed_offset();
        let changes_today = by_source()
            .filter(Column::CreatedAt.gte(start_of_day))
            .count(&self.db)
            .await?;

        let last_change = by_source()
            .order_by_desc(Column::CreatedAt)
            .one(&self.db)
            .await?
            .map(|entry| entry.created_at);

        Ok(AuditStats {
            source: source.to_string(),
            total_changes,
            creates,
            updates,
            destroys,
            distinct_affected_records,
            distinct_affected_types,
            changes_today,
            last_change,
        })
    }

    /// The newest `limit` run-correlated entries, grouped by run id.
    /// Groups are ordered by their latest entry, newest first; entries within
    /// a group are chronological.
    pub async fn recent_grouped_by_run(
        &self,
        limit: u64,
    ) -> Result<Vec<(Uuid, Vec<Model>)>, AuditError> {
        let recent = Entity::find()
            .filter(Column::SyncRunId.is_not_null())
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        let mut groups: Vec<(Uuid, Vec<Model>)> = Vec::new();
        let mut positions: HashMap<Uuid, usize> = HashMap::new();
        for entry in recent {
            let Some(run_id) = entry.sync_run_id else {
                continue;
            };
            let position = *positions.entry(run_id).or_insert_with(|| {
                groups.push((run_id, Vec::new()));
                groups.len() - 1
            });
            groups[position].1.push(entry);
        }
        for (_, entries) in &mut groups {
            entries.reverse();
        }
        Ok(groups)
    }

    /// Every entry correlated with one run, oldest first.
    pub async fn entries_for_run(&self, sync_run_id: Uuid) -> Result<Vec<Model>, AuditError> {
        Ok(Entity::find()
            .filter(Column::SyncRunId.eq(sync_run_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    /// One-line human readable summary such as
    /// `updated ExchangeRate EUR/2026-10-01 (amount, rate)`.
    pub fn describe(entry: &Model) -> String {
        let verb = match entry.action.parse::<AuditAction>() {
            Ok(AuditAction::Create) => "created",
            Ok(AuditAction::Update) => "updated",
            Ok(AuditAction::Destroy) => "destroyed",
            Err(_) => entry.action.as_str(),
        };

        let mut line = format!("{verb} {} {}", entry.target_type, entry.target_id);

        if entry.action == AuditAction::Update.as_str() {
            if let Some(JsonValue::Object(fields)) = &entry.changes {
                let names: Vec<&str> = fields.keys().map(String::as_str).collect();
                if !names.is_empty() {
                    line.push_str(&format!(" ({})", names.join(", ")));
                }
            }
        }

        line
    }
}
