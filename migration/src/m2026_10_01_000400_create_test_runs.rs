//! Migration to create the test_runs table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TestRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TestRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(TestRuns::TriggerId).uuid().not_null())
                    .col(ColumnDef::new(TestRuns::PipelineId).text().not_null())
                    .col(ColumnDef::new(TestRuns::Target).text().not_null())
                    .col(ColumnDef::new(TestRuns::CommitSha).text().not_null())
                    .col(
                        ColumnDef::new(TestRuns::Status)
                            .text()
                            .not_null()
                            .default("new"),
                    )
                    .col(ColumnDef::new(TestRuns::WebUrl).text().null())
                    .col(
                        ColumnDef::new(TestRuns::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TestRuns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_test_runs_trigger_id")
                            .from(TestRuns::Table, TestRuns::TriggerId)
                            .to(JobTriggers::Table, JobTriggers::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_test_runs_pipeline_id")
                    .table(TestRuns::Table)
                    .col(TestRuns::PipelineId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_test_runs_pipeline_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(TestRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum TestRuns {
    Table,
    Id,
    TriggerId,
    PipelineId,
    Target,
    CommitSha,
    Status,
    WebUrl,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum JobTriggers {
    Table,
    Id,
}
