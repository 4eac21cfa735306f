//! Test run repository for database operations

use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::test_run::{self, Entity as TestRun, TestRunStatus};

#[derive(Debug, Clone)]
pub struct TestRunRepository {
    pub db: Arc<DatabaseConnection>,
}

impl TestRunRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts a `new` test run; the raw `DbErr` is kept so callers can spot id collisions.
    pub async fn insert(
        &self,
        trigger_id: Uuid,
        pipeline_id: &str,
        target: &str,
        commit_sha: &str,
    ) -> Result<test_run::Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let record = test_run::ActiveModel {
            id: Set(Uuid::new_v4()),
            trigger_id: Set(trigger_id),
            pipeline_id: Set(pipeline_id.to_string()),
            target: Set(target.to_string()),
            commit_sha: Set(commit_sha.to_string()),
            status: Set(TestRunStatus::New.as_str().to_string()),
            web_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        record.insert(&*self.db).await
    }

    pub async fn find_by_pipeline_id(&self, pipeline_id: &str) -> Result<Option<test_run::Model>> {
        let found = TestRun::find()
            .filter(test_run::Column::PipelineId.eq(pipeline_id))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    pub async fn set_status(
        &self,
        record: test_run::Model,
        status: TestRunStatus,
        web_url: Option<String>,
    ) -> Result<test_run::Model> {
        let mut active: test_run::ActiveModel = record.into();
        active.status = Set(status.as_str().to_string());
        if web_url.is_some() {
            active.web_url = Set(web_url);
        }
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(active.update(&*self.db).await?)
    }
}
