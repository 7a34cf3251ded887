//! ExchangeRate entity model
//!
//! Daily fixing of one currency against the home currency, keyed by
//! (currency, rate_date).

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "exchange_rates")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// ISO 4217 code, upper case
    pub currency: String,

    /// Fixing date announced by the feed
    pub rate_date: Date,

    /// Number of foreign units the rate is quoted for (1, 100, 1000 ...)
    pub amount: i32,

    /// Home-currency value of `amount` units
    #[sea_orm(column_type = "Double")]
    pub rate: f64,

    /// Connector that produced the row
    pub source: String,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
