//! Migration to create the git_projects table.
//!
//! One row per forge repository the service has seen an event for, unique on
//! the project URL.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(GitProjects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GitProjects::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GitProjects::Forge).text().not_null())
                    .col(ColumnDef::new(GitProjects::Namespace).text().not_null())
                    .col(ColumnDef::new(GitProjects::RepoName).text().not_null())
                    .col(ColumnDef::new(GitProjects::ProjectUrl).text().not_null())
                    .col(
                        ColumnDef::new(GitProjects::CreatedAt)
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
                    .name("idx_git_projects_project_url")
                    .table(GitProjects::Table)
                    .col(GitProjects::ProjectUrl)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_git_projects_project_url").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(GitProjects::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum GitProjects {
    Table,
    Id,
    Forge,
    Namespace,
    RepoName,
    ProjectUrl,
    CreatedAt,
}
