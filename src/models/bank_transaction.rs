//! BankTransaction entity model
//!
//! A booked movement on a bank account, deduplicated by the external id the
//! bank assigns, scoped to the feed that produced it.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "bank_transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Connector name the transaction came from
    pub source: String,

    /// Bank-assigned movement id
    pub external_id: String,

    pub account_id: String,
    pub booked_on: Date,

    /// Signed amount in minor units (cents)
    pub amount_minor: i64,

    pub currency: String,
    pub counterparty: Option<String>,
    pub message: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
