//! # Billing Sync Library
//!
//! Connector-driven synchronization of external billing data (exchange
//! rates, bank movements) with per-run bookkeeping and an attributed audit
//! trail, plus the administrative HTTP surface around it.

pub mod audit;
pub mod auth;
pub mod config;
pub mod connectors;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod orchestrator;
pub mod repositories;
pub mod server;
pub mod sweeper;
pub mod telemetry;
pub use migration;
