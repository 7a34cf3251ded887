//! Database migrations for the billing sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000001_create_connector_configurations;
mod m2026_10_01_000002_create_sync_runs;
mod m2026_10_01_000003_create_audit_log_entries;
mod m2026_10_01_000004_create_exchange_rates;
mod m2026_10_01_000005_create_bank_transactions;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000001_create_connector_configurations::Migration),
            Box::new(m2026_10_01_000002_create_sync_runs::Migration),
            Box::new(m2026_10_01_000003_create_audit_log_entries::Migration),
            Box::new(m2026_10_01_000004_create_exchange_rates::Migration),
            Box::new(m2026_10_01_000005_create_bank_transactions::Migration),
        ]
    }
}
