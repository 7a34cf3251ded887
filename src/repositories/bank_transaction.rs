//! # BankTransaction Repository
//!
//! Natural-key upserts of booked movements, keyed by (source, external_id).

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use super::RepositoryError;
use crate::audit::{AuditLog, ChangeSet};
use crate::connectors::reconcile::UpsertOutcome;
use crate::models::bank_transaction::{ActiveModel, Column, Entity, Model};

pub const TARGET_TYPE: &str = "BankTransaction";

/// One movement as parsed from the statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBankTransaction {
    pub external_id: String,
    pub account_id: String,
    pub booked_on: NaiveDate,
    pub amount_minor: i64,
    pub currency: String,
    pub counterparty: Option<String>,
    pub message: Option<String>,
}

/// Repository for bank transaction database operations
pub struct BankTransactionRepository {
    db: DatabaseConnection,
}

impl BankTransactionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create, update or skip the movement identified by (source, external_id).
    pub async fn upsert(
        &self,
        source: &str,
        movement: &NewBankTransaction,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let txn = self.db.begin().await?;

        let existing = Entity::find()
            .filter(Column::Source.eq(source))
            .filter(Column::ExternalId.eq(movement.external_id.as_str()))
            .one(&txn)
            .await?;

        let now = Utc::now().fixed_offset();
        let outcome = match existing {
            None => {
                let created = ActiveModel {
                    id: Set(Uuid::new_v4()),
                    source: Set(source.to_string()),
                    external_id: Set(movement.external_id.clone()),
                    account_id: Set(movement.account_id.clone()),
                    booked_on: Set(movement.booked_on),
                    amount_minor: Set(movement.amount_minor),
                    currency: Set(movement.currency.clone()),
                    counterparty: Set(movement.counterparty.clone()),
                    message: Set(movement.message.clone()),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
                AuditLog::record_create(&txn, TARGET_TYPE, &created.id.to_string()).await?;
                UpsertOutcome::Created
            }
            Some(current) => {
                let changes = ChangeSet::new()
                    .track(
                        "account_id",
                        current.account_id.as_str(),
                        movement.account_id.as_str(),
                    )
                    .track(
                        "booked_on",
                        current.booked_on.to_string(),
                        movement.booked_on.to_string(),
                    )
                    .track("amount_minor", current.amount_minor, movement.amount_minor)
                    .track("currency", current.currency.as_str(), movement.currency.as_str())
                    .track(
                        "counterparty",
                        current.counterparty.clone(),
                        movement.counterparty.clone(),
                    )
                    .track("message", current.message.clone(), movement.message.clone());

                if changes.is_empty() {
                    UpsertOutcome::Unchanged
                } else {
                    let id = current.id;
                    let mut active: ActiveModel = current.into();
                    active.account_id = Set(movement.account_id.clone());
                    active.booked_on = Set(movement.booked_on);
                    active.amount_minor = Set(movement.amount_minor);
                    active.currency = Set(movement.currency.clone());
                    active.counterparty = Set(movement.counterparty.clone());
                    active.message = Set(movement.message.clone());
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                    AuditLog::record_update(&txn, TARGET_TYPE, &id.to_string(), &changes).await?;
                    UpsertOutcome::Updated(changes)
                }
            }
        };

        txn.commit().await?;
        Ok(outcome)
    }

    /// Delete a movement, preserving its final state in the audit log.
    /// Returns false when no such movement exists.
    pub async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let txn = self.db.begin().await?;

        let Some(current) = Entity::find_by_id(id).one(&txn).await? else {
            return Ok(false);
        };

        let final_state = serde_json::to_value(&current)?;
        current.delete(&txn).await?;
        AuditLog::record_destroy(&txn, TARGET_TYPE, &id.to_string(), final_state).await?;

        txn.commit().await?;
        Ok(true)
    }

    pub async fn find_by_external_id(
        &self,
        source: &str,
        external_id: &str,
    ) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Source.eq(source))
            .filter(Column::ExternalId.eq(external_id))
            .one(&self.db)
            .await
    }

    /// Movements from one feed, oldest booking first.
    pub async fn list_for_source(&self, source: &str) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Source.eq(source))
            .order_by_asc(Column::BookedOn)
            .all(&self.db)
            .await
    }

    pub async fn count(&self) -> Result<u64, DbErr> {
        Entity::find().count(&self.db).await
    }
}
