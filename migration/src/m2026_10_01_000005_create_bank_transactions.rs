//! Migration to create the bank_transactions table.
//!
//! Transactions are deduplicated by the external id scoped to the feed
//! that produced them.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(BankTransactions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(BankTransactions::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(BankTransactions::Source).text().not_null())
                    .col(ColumnDef::new(BankTransactions::ExternalId).text().not_null())
                    .col(ColumnDef::new(BankTransactions::AccountId).text().not_null())
                    .col(ColumnDef::new(BankTransactions::BookedOn).date().not_null())
                    .col(
                        ColumnDef::new(BankTransactions::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(BankTransactions::Currency).text().not_null())
                    .col(ColumnDef::new(BankTransactions::Counterparty).text().null())
                    .col(ColumnDef::new(BankTransactions::Message).text().null())
                    .col(
                        ColumnDef::new(BankTransactions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(BankTransactions::UpdatedAt)
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
                    .name("idx_bank_transactions_source_external_id")
                    .table(BankTransactions::Table)
                    .col(BankTransactions::Source)
                    .col(BankTransactions::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_bank_transactions_source_external_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(BankTransactions::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum BankTransactions {
    Table,
    Id,
    Source,
    ExternalId,
    AccountId,
    BookedOn,
    AmountMinor,
    Currency,
    Counterparty,
    Message,
    CreatedAt,
    UpdatedAt,
}
