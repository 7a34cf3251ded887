//! Migration to create the audit_log_entries table.
//!
//! Append-only: rows are inserted once and never updated or deleted by
//! application code.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditLogEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditLogEntries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditLogEntries::TargetType).text().not_null())
                    .col(ColumnDef::new(AuditLogEntries::TargetId).text().not_null())
                    .col(ColumnDef::new(AuditLogEntries::Action).text().not_null())
                    .col(ColumnDef::new(AuditLogEntries::Source).text().not_null())
                    .col(ColumnDef::new(AuditLogEntries::Changes).json_binary().null())
                    .col(ColumnDef::new(AuditLogEntries::SyncRunId).uuid().null())
                    .col(
                        ColumnDef::new(AuditLogEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_log_entries_target")
                    .table(AuditLogEntries::Table)
                    .col(AuditLogEntries::TargetType)
                    .col(AuditLogEntries::TargetId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_log_entries_source")
                    .table(AuditLogEntries::Table)
                    .col(AuditLogEntries::Source)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_log_entries_sync_run_id")
                    .table(AuditLogEntries::Table)
                    .col(AuditLogEntries::SyncRunId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_audit_log_entries_target",
            "idx_audit_log_entries_source",
            "idx_audit_log_entries_sync_run_id",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(AuditLogEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuditLogEntries {
    Table,
    Id,
    TargetType,
    TargetId,
    Action,
    Source,
    Changes,
    SyncRunId,
    CreatedAt,
}
