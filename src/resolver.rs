//! Lookup-or-create of the durable trigger entity behind a forge event.

use std::sync::Arc;

use anyhow::Result;
use sea_orm::DatabaseConnection;
use tracing::debug;

use crate::events::Event;
use crate::models::{git_project, job_trigger};
use crate::repositories::{ProjectRepository, TriggerRepository};

#[derive(Debug, Clone)]
pub struct TriggerResolver {
    projects: ProjectRepository,
    triggers: TriggerRepository,
}

impl TriggerResolver {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            projects: ProjectRepository::new(db.clone()),
            triggers: TriggerRepository::new(db),
        }
    }

    /// Resolves the trigger (and its project) an event belongs to.
    ///
    /// Returns `Ok(None)` for events without an identity: callbacks, or forge
    /// events missing a project URL or identifier. Safe to call repeatedly.
    pub async fn resolve(
        &self,
        event: &Event,
    ) -> Result<Option<(job_trigger::Model, git_project::Model)>> {
        let (Some(project), Some((kind, identifier))) = (event.project(), event.trigger_identity())
        else {
            debug!(trigger = %event.trigger_kind(), "Event has no trigger identity");
            return Ok(None);
        };
        if project.project_url.is_empty() {
            return Ok(None);
        }

        let project_row = self
            .projects
            .get_or_create(
                project.forge.as_str(),
                &project.namespace,
                &project.repo,
                &project.project_url,
            )
            .await?;
        let trigger = self
            .triggers
            .get_or_create(kind, project_row.id, &identifier)
            .await?;
        Ok(Some((trigger, project_row)))
    }
}
