//! # Data Models
//!
//! This module contains all the data models used by the billing sync service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod audit_log_entry;
pub mod bank_transaction;
pub mod connector_configuration;
pub mod exchange_rate;
pub mod sync_run;

pub use audit_log_entry::Entity as AuditLogEntry;
pub use bank_transaction::Entity as BankTransaction;
pub use connector_configuration::Entity as ConnectorConfiguration;
pub use exchange_rate::Entity as ExchangeRate;
pub use sync_run::Entity as SyncRun;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "billing-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
