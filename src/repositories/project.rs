//! Project repository for database operations

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::git_project::{self, Entity as GitProject};

/// Repository for git project rows
#[derive(Debug, Clone)]
pub struct ProjectRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl ProjectRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_url(&self, project_url: &str) -> Result<Option<git_project::Model>> {
        let project = GitProject::find()
            .filter(git_project::Column::ProjectUrl.eq(project_url))
            .one(&*self.db)
            .await?;
        Ok(project)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<git_project::Model>> {
        Ok(GitProject::find_by_id(id).one(&*self.db).await?)
    }

    /// Returns the project for `project_url`, inserting it on first sight.
    ///
    /// A concurrent insert of the same URL loses on the unique index and
    /// re-reads the winning row.
    pub async fn get_or_create(
        &self,
        forge: &str,
        namespace: &str,
        repo_name: &str,
        project_url: &str,
    ) -> Result<git_project::Model> {
        if let Some(existing) = self.find_by_url(project_url).await? {
            return Ok(existing);
        }

        let project = git_project::ActiveModel {
            id: Set(Uuid::new_v4()),
            forge: Set(forge.to_string()),
            namespace: Set(namespace.to_string()),
            repo_name: Set(repo_name.to_string()),
            project_url: Set(project_url.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        match project.insert(&*self.db).await {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => {
                debug!(project_url, "Project inserted concurrently, re-reading");
                self.find_by_url(project_url)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("project '{}' vanished after conflict", project_url))
            }
            Err(err) => Err(err.into()),
        }
    }
}
