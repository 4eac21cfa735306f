//! Migration to create the allowlist table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Allowlist::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Allowlist::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Allowlist::AccountName).text().not_null())
                    .col(ColumnDef::new(Allowlist::AccountType).text().null())
                    .col(
                        ColumnDef::new(Allowlist::Status)
                            .text()
                            .not_null()
                            .default("waiting"),
                    )
                    .col(ColumnDef::new(Allowlist::InstallationId).big_integer().null())
                    .col(ColumnDef::new(Allowlist::SenderLogin).text().null())
                    .col(
                        ColumnDef::new(Allowlist::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Allowlist::UpdatedAt)
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
                    .name("idx_allowlist_account_name")
                    .table(Allowlist::Table)
                    .col(Allowlist::AccountName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_allowlist_account_name").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Allowlist::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Allowlist {
    Table,
    Id,
    AccountName,
    AccountType,
    Status,
    InstallationId,
    SenderLogin,
    CreatedAt,
    UpdatedAt,
}
