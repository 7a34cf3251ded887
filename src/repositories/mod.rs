//! # Repository Layer
//!
//! Repositories encapsulate SeaORM operations. Every mutation they perform
//! writes its audit entry inside the same transaction.

use sea_orm::DbErr;
use thiserror::Error;

use crate::audit::AuditError;

pub mod bank_transaction;
pub mod connector_configuration;
pub mod exchange_rate;

pub use bank_transaction::{BankTransactionRepository, NewBankTransaction};
pub use connector_configuration::{
    ConfigurationErrors, ConfigurationStore, ConnectorSummary, ValidationError,
};
pub use exchange_rate::{ExchangeRateRepository, NewExchangeRate};

/// Failure of an audited repository write.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("failed to encode record state: {0}")]
    Encode(#[from] serde_json::Error),
}
