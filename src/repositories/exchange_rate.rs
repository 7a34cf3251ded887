//! # ExchangeRate Repository
//!
//! Natural-key upserts of daily fixings, keyed by (currency, rate_date).

use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use super::RepositoryError;
use crate::audit::{AuditLog, ChangeSet};
use crate::connectors::reconcile::UpsertOutcome;
use crate::models::exchange_rate::{ActiveModel, Column, Entity, Model};

pub const TARGET_TYPE: &str = "ExchangeRate";

/// One fixing as parsed from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct NewExchangeRate {
    pub currency: String,
    pub rate_date: NaiveDate,
    pub amount: i32,
    pub rate: f64,
}

/// Repository for exchange rate database operations
pub struct ExchangeRateRepository {
    db: DatabaseConnection,
}

impl ExchangeRateRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Create, update or skip the fixing identified by (currency, rate_date).
    pub async fn upsert(
        &self,
        source: &str,
        fixing: &NewExchangeRate,
    ) -> Result<UpsertOutcome, RepositoryError> {
        let txn = self.db.begin().await?;

        let existing = Entity::find()
            .filter(Column::Currency.eq(fixing.currency.as_str()))
            .filter(Column::RateDate.eq(fixing.rate_date))
            .one(&txn)
            .await?;

        let now = Utc::now().fixed_offset();
        let outcome = match existing {
            None => {
                let created = ActiveModel {
                    id: Set(Uuid::new_v4()),
                    currency: Set(fixing.currency.clone()),
                    rate_date: Set(fixing.rate_date),
                    amount: Set(fixing.amount),
                    rate: Set(fixing.rate),
                    source: Set(source.to_string()),
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
                    .track("amount", current.amount, fixing.amount)
                    .track("rate", current.rate, fixing.rate);

                if changes.is_empty() {
                    UpsertOutcome::Unchanged
                } else {
                    let id = current.id;
                    let mut active: ActiveModel = current.into();
                    active.amount = Set(fixing.amount);
                    active.rate = Set(fixing.rate);
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

    pub async fn find(&self, currency: &str, rate_date: NaiveDate) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::Currency.eq(currency))
            .filter(Column::RateDate.eq(rate_date))
            .one(&self.db)
            .await
    }

    /// All fixings for one day, ordered by currency code.
    pub async fn list_for_date(&self, rate_date: NaiveDate) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::RateDate.eq(rate_date))
            .order_by_asc(Column::Currency)
            .all(&self.db)
            .await
    }

    pub async fn count(&self) -> Result<u64, DbErr> {
        Entity::find().count(&self.db).await
    }
}
