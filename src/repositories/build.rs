//! Build repository for database operations

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::build::{self, BuildStatus, Entity as Build};

/// Fields of a freshly submitted build.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub trigger_id: Uuid,
    pub backend: String,
    pub build_id: String,
    pub target: String,
    pub owner: String,
    pub project_name: String,
    pub commit_sha: String,
    pub web_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BuildRepository {
    pub db: Arc<DatabaseConnection>,
}

impl BuildRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a pending build; the raw `DbErr` is kept so callers can spot duplicates.
    pub async fn insert(&self, new: NewBuild) -> Result<build::Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let record = build::ActiveModel {
            id: Set(Uuid::new_v4()),
            trigger_id: Set(new.trigger_id),
            backend: Set(new.backend),
            build_id: Set(new.build_id),
            target: Set(new.target),
            owner: Set(new.owner),
            project_name: Set(new.project_name),
            status: Set(BuildStatus::Pending.as_str().to_string()),
            commit_sha: Set(new.commit_sha),
            web_url: Set(new.web_url),
            build_logs_url: Set(None),
            start_time: Set(None),
            end_time: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        record.insert(&*self.db).await
    }

    pub async fn find(
        &self,
        backend: &str,
        build_id: &str,
        target: &str,
    ) -> Result<Option<build::Model>> {
        let found = Build::find()
            .filter(build::Column::Backend.eq(backend))
            .filter(build::Column::BuildId.eq(build_id))
            .filter(build::Column::Target.eq(target))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// First build with the backend id, whatever its target.
    pub async fn find_any_target(
        &self,
        backend: &str,
        build_id: &str,
    ) -> Result<Option<build::Model>> {
        let found = Build::find()
            .filter(build::Column::Backend.eq(backend))
            .filter(build::Column::BuildId.eq(build_id))
            .order_by_asc(build::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    pub async fn list_for_trigger(&self, trigger_id: Uuid) -> Result<Vec<build::Model>> {
        let builds = Build::find()
            .filter(build::Column::TriggerId.eq(trigger_id))
            .order_by_asc(build::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(builds)
    }

    /// Most recent successful `backend` build of `target` at `commit_sha` for the trigger.
    pub async fn latest_successful(
        &self,
        backend: &str,
        trigger_id: Uuid,
        target: &str,
        commit_sha: &str,
    ) -> Result<Option<build::Model>> {
        let found = Build::find()
            .filter(build::Column::Backend.eq(backend))
            .filter(build::Column::TriggerId.eq(trigger_id))
            .filter(build::Column::Target.eq(target))
            .filter(build::Column::CommitSha.eq(commit_sha))
            .filter(build::Column::Status.eq(BuildStatus::Success.as_str()))
            .order_by_desc(build::Column::CreatedAt)
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// Writes a new status and the matching timestamp.
    pub async fn set_status(
        &self,
        record: build::Model,
        status: BuildStatus,
        build_logs_url: Option<String>,
    ) -> Result<build::Model> {
        let now = Utc::now().fixed_offset();
        let mut active: build::ActiveModel = record.into();
        active.status = Set(status.as_str().to_string());
        if status == BuildStatus::Running {
            active.start_time = Set(Some(now));
        }
        if status.is_terminal() {
            active.end_time = Set(Some(now));
        }
        if build_logs_url.is_some() {
            active.build_logs_url = Set(build_logs_url);
        }
        active.updated_at = Set(now);
        Ok(active.update(&*self.db).await?)
    }
}
