//! Trigger repository for database operations

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::git_project;
use crate::models::job_trigger::{self, Entity as JobTrigger, TriggerEntityKind};

#[derive(Debug, Clone)]
pub struct TriggerRepository {
    pub db: Arc<DatabaseConnection>,
}

impl TriggerRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find(
        &self,
        kind: TriggerEntityKind,
        project_id: Uuid,
        identifier: &str,
    ) -> Result<Option<job_trigger::Model>> {
        let trigger = JobTrigger::find()
            .filter(job_trigger::Column::Kind.eq(kind.as_str()))
            .filter(job_trigger::Column::ProjectId.eq(project_id))
            .filter(job_trigger::Column::Identifier.eq(identifier))
            .one(&*self.db)
            .await?;
        Ok(trigger)
    }

    /// Loads a trigger together with its project.
    pub async fn find_with_project(
        &self,
        id: Uuid,
    ) -> Result<Option<(job_trigger::Model, git_project::Model)>> {
        let found = JobTrigger::find_by_id(id)
            .find_also_related(git_project::Entity)
            .one(&*self.db)
            .await?;
        Ok(match found {
            Some((trigger, Some(project))) => Some((trigger, project)),
            _ => None,
        })
    }

    /// Returns the trigger for (kind, project, identifier), inserting it on first sight.
    pub async fn get_or_create(
        &self,
        kind: TriggerEntityKind,
        project_id: Uuid,
        identifier: &str,
    ) -> Result<job_trigger::Model> {
        if let Some(existing) = self.find(kind, project_id, identifier).await? {
            return Ok(existing);
        }

        let trigger = job_trigger::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(kind.as_str().to_string()),
            project_id: Set(project_id),
            identifier: Set(identifier.to_string()),
            created_at: Set(Utc::now().fixed_offset()),
        };

        match trigger.insert(&*self.db).await {
            Ok(created) => Ok(created),
            Err(err) if is_unique_violation(&err) => {
                debug!(kind = %kind, identifier, "Trigger inserted concurrently, re-reading");
                self.find(kind, project_id, identifier)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("trigger '{}:{}' vanished after conflict", kind, identifier))
            }
            Err(err) => Err(err.into()),
        }
    }
}
