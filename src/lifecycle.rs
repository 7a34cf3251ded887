//! Sync Run Lifecycle
//!
//! Every connector invocation is recorded as a `sync_runs` row that moves
//! `pending -> running -> completed | failed`. Terminal transitions are
//! conditional updates filtered on the unfinished states, so a run is
//! finalized at most once and a finalized run never changes again.
//!
//! [`SyncLifecycle::run`] wraps one connector call: it creates the run, scopes
//! the audit context to it for the duration of the call, and finalizes the
//! run from the call's result. Runs whose process died mid-call are recovered
//! by [`LifecycleRecorder::sweep_orphaned_runs`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, histogram};
use sea_orm::prelude::{DateTimeWithTimeZone, Expr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditContext, with_audit_context};
use crate::connectors::trait_::{Connector, ConnectorError, Settings, SyncContext, SyncOutcome};
use crate::crypto::Credentials;
use crate::models::sync_run::{ActiveModel, Column, Entity, Model, SyncRunStatus};
use crate::telemetry::{SYNC_RUN_DURATION_SECONDS, SYNC_RUNS_ORPHANED_TOTAL, SYNC_RUNS_TOTAL};

/// Message written to runs force-failed by the orphan sweep.
pub const ORPHANED_RUN_MESSAGE: &str = "Sync run timed out (orphaned process)";

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("sync run bookkeeping failed: {source}")]
    Bookkeeping {
        run_id: Option<Uuid>,
        #[source]
        source: DbErr,
    },
    #[error("sync run {run_id} not found")]
    RunNotFound { run_id: Uuid },
    #[error("sync run {run_id} cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: Uuid,
        from: SyncRunStatus,
        to: SyncRunStatus,
    },
    /// The connector failed; the run has already been recorded as failed.
    #[error("{source}")]
    ConnectorFailed {
        run_id: Uuid,
        source: ConnectorError,
    },
}

impl LifecycleError {
    /// Run the error belongs to, when one was created.
    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            LifecycleError::ConnectorFailed { run_id, .. }
            | LifecycleError::RunNotFound { run_id }
            | LifecycleError::InvalidTransition { run_id, .. } => Some(*run_id),
            LifecycleError::Bookkeeping { run_id, .. } => *run_id,
        }
    }

    fn for_run(self, id: Uuid) -> Self {
        match self {
            LifecycleError::Bookkeeping { source, .. } => LifecycleError::Bookkeeping {
                run_id: Some(id),
                source,
            },
            other => other,
        }
    }
}

impl From<DbErr> for LifecycleError {
    fn from(source: DbErr) -> Self {
        LifecycleError::Bookkeeping {
            run_id: None,
            source,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("connector panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("connector panicked: {message}")
    } else {
        "connector panicked".to_string()
    }
}

/// Aggregate view of one connector's runs.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RunStats {
    pub connector_name: String,
    pub total_runs: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_flight: u64,
    /// completed / (completed + failed); absent until a run has finished
    pub success_rate: Option<f64>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_run_at: Option<DateTimeWithTimeZone>,
    #[schema(value_type = Option<String>, format = DateTime)]
    pub last_success_at: Option<DateTimeWithTimeZone>,
    pub total_records_processed: i64,
    pub total_records_created: i64,
    pub total_records_updated: i64,
}

fn clamp_count(count: u32) -> i32 {
    i32::try_from(count).unwrap_or(i32::MAX)
}

/// Persistence of sync run rows and their state transitions.
#[derive(Clone)]
pub struct LifecycleRecorder {
    db: DatabaseConnection,
}

impl LifecycleRecorder {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Insert a new pending run.
    pub async fn record_start(&self, connector_name: &str) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        ActiveModel {
            id: Set(Uuid::new_v4()),
            connector_name: Set(connector_name.to_string()),
            status: Set(SyncRunStatus::Pending.as_str().to_string()),
            started_at: Set(now),
            completed_at: Set(None),
            records_processed: Set(0),
            records_created: Set(0),
            records_updated: Set(0),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&self.db)
        .await
    }

    /// pending -> running
    pub async fn record_running(&self, run_id: Uuid) -> Result<Model, LifecycleError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncRunStatus::Running.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(run_id))
            .filter(Column::Status.eq(SyncRunStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;

        self.after_transition(run_id, result.rows_affected, SyncRunStatus::Running)
            .await
    }

    /// Finalize as completed with the outcome's counts.
    pub async fn record_success(
        &self,
        run_id: Uuid,
        outcome: &SyncOutcome,
    ) -> Result<Model, LifecycleError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncRunStatus::Completed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(
                Column::RecordsProcessed,
                Expr::value(clamp_count(outcome.records_processed)),
            )
            .col_expr(
                Column::RecordsCreated,
                Expr::value(clamp_count(outcome.records_created)),
            )
            .col_expr(
                Column::RecordsUpdated,
                Expr::value(clamp_count(outcome.records_updated)),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(run_id))
            .filter(Column::Status.is_in(SyncRunStatus::UNFINISHED.map(|s| s.as_str())))
            .exec(&self.db)
            .await?;

        self.after_transition(run_id, result.rows_affected, SyncRunStatus::Completed)
            .await
    }

    /// Finalize as failed with `message`.
    pub async fn record_failure(
        &self,
        run_id: Uuid,
        message: &str,
    ) -> Result<Model, LifecycleError> {
        let now = Utc::now().fixed_offset();
        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncRunStatus::Failed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::ErrorMessage, Expr::value(message))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(run_id))
            .filter(Column::Status.is_in(SyncRunStatus::UNFINISHED.map(|s| s.as_str())))
            .exec(&self.db)
            .await?;

        self.after_transition(run_id, result.rows_affected, SyncRunStatus::Failed)
            .await
    }

    async fn after_transition(
        &self,
        run_id: Uuid,
        rows_affected: u64,
        to: SyncRunStatus,
    ) -> Result<Model, LifecycleError> {
        let run = self
            .find(run_id)
            .await?
            .ok_or(LifecycleError::RunNotFound { run_id })?;

        if rows_affected == 0 {
            return Err(LifecycleError::InvalidTransition {
                run_id,
                from: run.status(),
                to,
            });
        }
        Ok(run)
    }

    pub async fn find(&self, run_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(run_id).one(&self.db).await
    }

    /// Newest first; all connectors when `connector_name` is `None`.
    pub async fn recent_runs(
        &self,
        connector_name: Option<&str>,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        let mut query = Entity::find();
        if let Some(name) = connector_name {
            query = query.filter(Column::ConnectorName.eq(name));
        }
        query
            .order_by_desc(Column::StartedAt)
            .limit(limit)
            .all(&self.db)
            .await
    }

    pub async fn stats(&self, connector_name: &str) -> Result<RunStats, DbErr> {
        let for_connector = || Entity::find().filter(Column::ConnectorName.eq(connector_name));

        let total_runs = for_connector().count(&self.db).await?;
        let completed = for_connector()
            .filter(Column::Status.eq(SyncRunStatus::Completed.as_str()))
            .count(&self.db)
            .await?;
        let failed = for_connector()
            .filter(Column::Status.eq(SyncRunStatus::Failed.as_str()))
            .count(&self.db)
            .await?;

        let last_run_at = for_connector()
            .order_by_desc(Column::StartedAt)
            .one(&self.db)
            .await?
            .map(|run| run.started_at);
        let last_success_at = for_connector()
            .filter(Column::Status.eq(SyncRunStatus::Completed.as_str()))
            .order_by_desc(Column::CompletedAt)
            .one(&self.db)
            .await?
            .and_then(|run| run.completed_at);

        let (processed, created, updated) = for_connector()
            .select_only()
            .expr(Expr::col(Column::RecordsProcessed).sum())
            .expr(Expr::col(Column::RecordsCreated).sum())
            .expr(Expr::col(Column::RecordsUpdated).sum())
            .into_tuple::<(Option<i64>, Option<i64>, Option<i64>)>()
            .one(&self.db)
            .await?
            .unwrap_or_default();

        let finished = completed + failed;
        Ok(RunStats {
            connector_name: connector_name.to_string(),
            total_runs,
            completed,
            failed,
            in_flight: total_runs.saturating_sub(finished),
            success_rate: (finished > 0).then(|| completed as f64 / finished as f64),
            last_run_at,
            last_success_at,
            total_records_processed: processed.unwrap_or(0),
            total_records_created: created.unwrap_or(0),
            total_records_updated: updated.unwrap_or(0),
        })
    }

    /// Force-fail unfinished runs that started more than `threshold` ago.
    #[instrument(skip(self))]
    pub async fn sweep_orphaned_runs(&self, threshold: Duration) -> Result<u64, DbErr> {
        let now = Utc::now().fixed_offset();
        let cutoff = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(now);

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(SyncRunStatus::Failed.as_str()))
            .col_expr(Column::CompletedAt, Expr::value(now))
            .col_expr(Column::ErrorMessage, Expr::value(ORPHANED_RUN_MESSAGE))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Status.is_in(SyncRunStatus::UNFINISHED.map(|s| s.as_str())))
            .filter(Column::StartedAt.lt(cutoff))
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            counter!(SYNC_RUNS_ORPHANED_TOTAL).increment(result.rows_affected);
            warn!(
                orphaned = result.rows_affected,
                threshold_secs = threshold.as_secs(),
                "Marked orphaned sync runs as failed"
            );
        }
        Ok(result.rows_affected)
    }
}

/// Runs one connector call under a recorded sync run.
#[derive(Clone)]
pub struct SyncLifecycle {
    db: DatabaseConnection,
    recorder: LifecycleRecorder,
}

impl SyncLifecycle {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            recorder: LifecycleRecorder::new(db.clone()),
            db,
        }
    }

    pub fn recorder(&self) -> &LifecycleRecorder {
        &self.recorder
    }

    /// Create the run, invoke the connector inside its audit context and
    /// finalize the run. A connector error or panic is recorded on the run and
    /// then returned as [`LifecycleError::ConnectorFailed`]. Once the run row
    /// exists every error carries its id.
    #[instrument(skip_all, fields(connector = %connector.name()))]
    pub async fn run(
        &self,
        connector: Arc<dyn Connector>,
        credentials: Credentials,
        settings: Settings,
    ) -> Result<(Model, SyncOutcome), LifecycleError> {
        let connector_name = connector.name().to_string();
        let run = self.recorder.record_start(&connector_name).await?;
        let run_id = run.id;
        if let Err(err) = self.recorder.record_running(run_id).await {
            self.abandon(run_id, &err).await;
            return Err(err.for_run(run_id));
        }

        info!(%run_id, "Sync run started");
        let timer = Instant::now();

        let ctx = SyncContext {
            connector_name: connector_name.clone(),
            sync_run_id: run_id,
            credentials,
            settings,
            db: self.db.clone(),
        };
        let result = AssertUnwindSafe(with_audit_context(
            AuditContext::for_run(connector_name.clone(), run_id),
            connector.sync(ctx),
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(ConnectorError::Failed(panic_message(panic.as_ref()))));

        let elapsed = timer.elapsed().as_secs_f64();
        histogram!(SYNC_RUN_DURATION_SECONDS, "connector" => connector_name.clone())
            .record(elapsed);

        match result {
            Ok(outcome) => {
                let run = match self.recorder.record_success(run_id, &outcome).await {
                    Ok(run) => run,
                    Err(err) => {
                        self.abandon(run_id, &err).await;
                        return Err(err.for_run(run_id));
                    }
                };
                counter!(
                    SYNC_RUNS_TOTAL,
                    "connector" => connector_name,
                    "status" => SyncRunStatus::Completed.as_str()
                )
                .increment(1);
                info!(
                    %run_id,
                    processed = outcome.records_processed,
                    created = outcome.records_created,
                    updated = outcome.records_updated,
                    elapsed_secs = elapsed,
                    "Sync run completed"
                );
                Ok((run, outcome))
            }
            Err(source) => {
                let message = source.to_string();
                if let Err(err) = self.recorder.record_failure(run_id, &message).await {
                    error!(%run_id, error = %err, connector_error = %message, "Could not record failed sync run");
                    return Err(err.for_run(run_id));
                }
                counter!(
                    SYNC_RUNS_TOTAL,
                    "connector" => connector_name,
                    "status" => SyncRunStatus::Failed.as_str()
                )
                .increment(1);
                warn!(%run_id, error = %message, elapsed_secs = elapsed, "Sync run failed");
                Err(LifecycleError::ConnectorFailed { run_id, source })
            }
        }
    }

    /// Best-effort failure of a run whose own bookkeeping broke. If this
    /// also fails the orphan sweep finalizes the run later.
    async fn abandon(&self, run_id: Uuid, cause: &LifecycleError) {
        let message = cause.to_string();
        match self.recorder.record_failure(run_id, &message).await {
            Ok(_) | Err(LifecycleError::InvalidTransition { .. }) => {}
            Err(err) => {
                error!(%run_id, error = %err, cause = %message, "Could not fail sync run after bookkeeping error");
            }
        }
    }
}
