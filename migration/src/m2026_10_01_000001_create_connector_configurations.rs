//! Migration to create the connector_configurations table.
//!
//! One row per connector name holding the enabled flag, the encrypted
//! credential envelope and the plain settings object.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConnectorConfigurations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConnectorConfigurations::ConnectorName)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConnectorConfigurations::Enabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ConnectorConfigurations::CredentialsCiphertext)
                            .binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorConfigurations::Settings)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConnectorConfigurations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ConnectorConfigurations::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(ConnectorConfigurations::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum ConnectorConfigurations {
    Table,
    ConnectorName,
    Enabled,
    CredentialsCiphertext,
    Settings,
    CreatedAt,
    UpdatedAt,
}
