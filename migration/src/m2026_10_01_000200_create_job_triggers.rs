//! Migration to create the job_triggers table.
//!
//! A trigger is the durable subject of automation (pull request, branch push,
//! release or issue). The unique index on (kind, project_id, identifier) backs
//! concurrent get-or-create.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(JobTriggers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobTriggers::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(JobTriggers::Kind).text().not_null())
                    .col(ColumnDef::new(JobTriggers::ProjectId).uuid().not_null())
                    .col(ColumnDef::new(JobTriggers::Identifier).text().not_null())
                    .col(
                        ColumnDef::new(JobTriggers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_job_triggers_project_id")
                            .from(JobTriggers::Table, JobTriggers::ProjectId)
                            .to(GitProjects::Table, GitProjects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_job_triggers_kind_project_identifier")
                    .table(JobTriggers::Table)
                    .col(JobTriggers::Kind)
                    .col(JobTriggers::ProjectId)
                    .col(JobTriggers::Identifier)
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
                    .name("idx_job_triggers_kind_project_identifier")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(JobTriggers::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum JobTriggers {
    Table,
    Id,
    Kind,
    ProjectId,
    Identifier,
    CreatedAt,
}

#[derive(DeriveIden)]
enum GitProjects {
    Table,
    Id,
}
