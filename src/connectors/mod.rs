//! Connectors module
//!
//! This module provides the connector SDK including:
//! - The `Connector` trait every data source implements
//! - Descriptors and the registry for discovery and lookup
//! - Shared fetch (retry/backoff) and reconcile (upsert tally) helpers
//! - The connectors shipped with the service

pub mod bank_feed;
pub mod example;
pub mod exchange_rates;
pub mod fetch;
pub mod metadata;
pub mod reconcile;
pub mod registry;
pub mod trait_;

pub use bank_feed::BankFeedConnector;
pub use example::ExampleConnector;
pub use exchange_rates::ExchangeRatesConnector;
pub use fetch::{FetchError, HttpFetcher, RetryPolicy};
pub use metadata::{ConnectorDescriptor, ConnectorMetadata};
pub use reconcile::{SyncTally, UpsertOutcome};
pub use registry::{Registry, RegistryError};
pub use trait_::{
    Connector, ConnectorError, FieldSpec, FieldType, Settings, SyncContext, SyncOutcome,
};
