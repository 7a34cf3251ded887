//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations applied, plus a scriptable connector and builders for the
//! services under test.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use billing_sync::audit::AuditContext;
use billing_sync::connectors::{
    Connector, ConnectorError, FieldSpec, FieldType, Registry, SyncContext, SyncOutcome,
    SyncTally, UpsertOutcome,
};
use billing_sync::crypto::CryptoKey;
use billing_sync::lifecycle::SyncLifecycle;
use billing_sync::orchestrator::Orchestrator;
use billing_sync::repositories::{ConfigurationStore, ExchangeRateRepository, NewExchangeRate};
use chrono::NaiveDate;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use serde_json::json;
use tokio::sync::Mutex;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("32 byte key")
}

/// What a [`StubConnector`] does when synced.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Return a successful outcome with the given counts.
    Succeed {
        processed: u32,
        created: u32,
        updated: u32,
    },
    /// Upsert one EUR fixing per given rate, then succeed with the tally.
    WriteRates(Vec<f64>),
    /// Fail with this message.
    Fail(String),
    /// Write one fixing, then fail.
    WriteThenFail(String),
    /// Sleep, recording how many syncs overlap.
    Sleep(Duration),
    /// Panic mid-sync.
    Panic,
    /// Run this SQL statement, then succeed.
    ExecuteSql(String),
}

/// Connector whose `sync` is scripted by the test.
pub struct StubConnector {
    name: String,
    requires_credentials: bool,
    behavior: StubBehavior,
    pub calls: AtomicUsize,
    pub seen_contexts: Mutex<Vec<AuditContext>>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl StubConnector {
    pub fn new(name: &str, behavior: StubBehavior) -> Self {
        Self {
            name: name.to_string(),
            requires_credentials: false,
            behavior,
            calls: AtomicUsize::new(0),
            seen_contexts: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(name: &str) -> Self {
        Self::new(
            name,
            StubBehavior::Succeed {
                processed: 3,
                created: 3,
                updated: 0,
            },
        )
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self::new(name, StubBehavior::Fail(message.to_string()))
    }

    pub fn with_required_credentials(mut self) -> Self {
        self.requires_credentials = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn fixing_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 1).expect("valid date")
}

async fn write_rate(ctx: &SyncContext, rate: f64) -> Result<UpsertOutcome, ConnectorError> {
    let repository = ExchangeRateRepository::new(ctx.db.clone());
    let fixing = NewExchangeRate {
        currency: "EUR".to_string(),
        rate_date: fixing_date(),
        amount: 1,
        rate,
    };
    Ok(repository.upsert(&ctx.connector_name, &fixing).await?)
}

#[async_trait]
impl Connector for StubConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn description(&self) -> &str {
        "scripted test connector"
    }

    fn credential_fields(&self) -> Vec<FieldSpec> {
        let field = FieldSpec::new("api_key", "API key", FieldType::Password);
        if self.requires_credentials {
            vec![field.required()]
        } else {
            vec![field]
        }
    }

    fn setting_fields(&self) -> Vec<FieldSpec> {
        Vec::new()
    }

    async fn sync(&self, ctx: SyncContext) -> Result<SyncOutcome, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_contexts.lock().await.push(AuditContext::current());

        match &self.behavior {
            StubBehavior::Succeed {
                processed,
                created,
                updated,
            } => Ok(SyncOutcome {
                success: true,
                records_processed: *processed,
                records_created: *created,
                records_updated: *updated,
                data: Some(json!({ "stub": true })),
            }),
            StubBehavior::WriteRates(rates) => {
                let mut tally = SyncTally::default();
                for rate in rates {
                    tally.record(&write_rate(&ctx, *rate).await?);
                }
                Ok(tally.into_outcome(None))
            }
            StubBehavior::Fail(message) => Err(ConnectorError::Failed(message.clone())),
            StubBehavior::WriteThenFail(message) => {
                write_rate(&ctx, 25.0).await?;
                Err(ConnectorError::Failed(message.clone()))
            }
            StubBehavior::Sleep(duration) => {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(*duration).await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(SyncOutcome::succeeded())
            }
            StubBehavior::Panic => {
                let fixings: Vec<f64> = Vec::new();
                let first = fixings[self.calls.load(Ordering::SeqCst)];
                Ok(SyncOutcome::succeeded().with_data(json!({ "first": first })))
            }
            StubBehavior::ExecuteSql(statement) => {
                ctx.db.execute_unprepared(statement).await?;
                Ok(SyncOutcome::succeeded())
            }
        }
    }
}

/// Registry holding exactly the given connectors.
pub fn registry_with(connectors: Vec<Arc<dyn Connector>>) -> Arc<Registry> {
    let mut registry = Registry::new();
    for connector in connectors {
        registry.register(connector).expect("unique connector names");
    }
    Arc::new(registry)
}

/// Everything an orchestrator test needs, sharing one database.
pub struct Harness {
    pub db: DatabaseConnection,
    pub registry: Arc<Registry>,
    pub store: ConfigurationStore,
    pub lifecycle: SyncLifecycle,
    pub orchestrator: Orchestrator,
}

pub async fn harness(connectors: Vec<Arc<dyn Connector>>) -> Result<Harness> {
    let db = setup_test_db().await?;
    let registry = registry_with(connectors);
    let store = ConfigurationStore::new(db.clone(), test_crypto_key(), registry.clone());
    let lifecycle = SyncLifecycle::new(db.clone());
    let orchestrator = Orchestrator::new(registry.clone(), store.clone(), lifecycle.clone());
    Ok(Harness {
        db,
        registry,
        store,
        lifecycle,
        orchestrator,
    })
}
