//! Migration to create the builds table.
//!
//! Each row tracks one (build id, target) pair submitted to a build backend.
//! Callbacks locate the row through the unique (backend, build_id, target) index.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Builds::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Builds::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Builds::TriggerId).uuid().not_null())
                    .col(
                        ColumnDef::new(Builds::Backend)
                            .text()
                            .not_null()
                            .default("copr"),
                    )
                    .col(ColumnDef::new(Builds::BuildId).text().not_null())
                    .col(ColumnDef::new(Builds::Target).text().not_null())
                    .col(ColumnDef::new(Builds::Owner).text().not_null())
                    .col(ColumnDef::new(Builds::ProjectName).text().not_null())
                    .col(
                        ColumnDef::new(Builds::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Builds::CommitSha).text().not_null())
                    .col(ColumnDef::new(Builds::WebUrl).text().null())
                    .col(ColumnDef::new(Builds::BuildLogsUrl).text().null())
                    .col(
                        ColumnDef::new(Builds::StartTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Builds::EndTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Builds::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Builds::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_builds_trigger_id")
                            .from(Builds::Table, Builds::TriggerId)
                            .to(JobTriggers::Table, JobTriggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_builds_backend_build_id_target")
                    .table(Builds::Table)
                    .col(Builds::Backend)
                    .col(Builds::BuildId)
                    .col(Builds::Target)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_builds_trigger_target_status")
                    .table(Builds::Table)
                    .col(Builds::TriggerId)
                    .col(Builds::Target)
                    .col(Builds::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_builds_backend_build_id_target")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_builds_trigger_target_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Builds::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Builds {
    Table,
    Id,
    TriggerId,
    Backend,
    BuildId,
    Target,
    Owner,
    ProjectName,
    Status,
    CommitSha,
    WebUrl,
    BuildLogsUrl,
    StartTime,
    EndTime,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum JobTriggers {
    Table,
    Id,
}
