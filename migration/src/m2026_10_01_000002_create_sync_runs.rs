//! Migration to create the sync_runs table.
//!
//! Each row tracks one invocation of a connector's sync through the
//! pending -> running -> completed|failed lifecycle.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncRuns::ConnectorName).text().not_null())
                    .col(
                        ColumnDef::new(SyncRuns::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::RecordsProcessed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::RecordsCreated)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::RecordsUpdated)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncRuns::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(SyncRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncRuns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Orphan sweep scans unfinished runs by age
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_status_started_at")
                    .table(SyncRuns::Table)
                    .col(SyncRuns::Status)
                    .col(SyncRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_runs_connector_started_at")
                    .table(SyncRuns::Table)
                    .col(SyncRuns::ConnectorName)
                    .col(SyncRuns::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_runs_status_started_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_runs_connector_started_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(SyncRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncRuns {
    Table,
    Id,
    ConnectorName,
    Status,
    StartedAt,
    CompletedAt,
    RecordsProcessed,
    RecordsCreated,
    RecordsUpdated,
    ErrorMessage,
    CreatedAt,
    UpdatedAt,
}
