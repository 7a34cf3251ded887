//! # Billing Sync Entry Point
//!
//! `serve` runs the administrative API with the background orphan sweeper.
//! The remaining subcommands are one-shot operations meant for cron and
//! operators.

use std::sync::Arc;

use anyhow::Context;
use billing_sync::{
    config::{AppConfig, ConfigLoader},
    connectors::registry::Registry,
    db,
    handlers::audit::AuditEntryInfo,
    server::{AppState, run_server},
    telemetry,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "billing-sync", about = "Billing data connectors and sync bookkeeping")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server and orphan sweeper (default)
    Serve,
    /// Run one connector
    Execute { name: String },
    /// Run every enabled connector
    ExecuteAll,
    /// Force-fail runs stuck past the orphan threshold
    SweepOrphans,
    /// List connectors and their configuration state
    Connectors,
    /// Enable a connector
    Enable { name: String },
    /// Disable a connector
    Disable { name: String },
    /// Audit statistics for a connector name or "user"
    Stats { source: String },
    /// Audit history of one record
    History {
        target_type: String,
        target_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    config.validate()?;
    telemetry::init_tracing(&config)?;

    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Loaded configuration");
    }

    let state = build_state(config).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            state.config.require_operator_tokens()?;
            run_server(state).await?;
        }
        Commands::Execute { name } => {
            let result = state.orchestrator.execute(&name).await;
            print_json(&result)?;
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::ExecuteAll => {
            let summary = state.orchestrator.execute_all_with_summary().await;
            print_json(&summary)?;
            if summary.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::SweepOrphans => {
            let swept = state
                .recorder
                .sweep_orphaned_runs(state.config.sync.orphan_threshold())
                .await?;
            println!("{swept}");
        }
        Commands::Connectors => {
            print_json(&state.store.all_connectors_summary().await?)?;
        }
        Commands::Enable { name } => {
            state.store.enable(&name).await?;
            print_json(&state.store.summary(&name).await?)?;
        }
        Commands::Disable { name } => {
            state.store.disable(&name).await?;
            print_json(&state.store.summary(&name).await?)?;
        }
        Commands::Stats { source } => {
            print_json(&state.audit.stats_for(&source).await?)?;
        }
        Commands::History {
            target_type,
            target_id,
        } => {
            let entries: Vec<AuditEntryInfo> = state
                .audit
                .history_for(&target_type, &target_id)
                .await?
                .into_iter()
                .map(AuditEntryInfo::from)
                .collect();
            for entry in &entries {
                println!("{}  {}", entry.created_at, entry.description);
            }
        }
    }

    Ok(())
}

async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let key = config.crypto_key()?;
    let pool = db::init_pool(&config).await?;
    db::migrate(&pool).await?;

    let registry = Registry::builtin(&config).context("Failed to build connector registry")?;
    Ok(AppState::new(Arc::new(config), pool, Arc::new(registry), key))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
