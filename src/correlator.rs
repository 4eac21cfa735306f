//! Correlation of backend callbacks with the triggers that caused them.
//!
//! Build ids and pipeline ids are persisted at submission time, so a
//! callback arriving after a restart still finds its trigger and project.
//! Status transitions only move forward; replays are absorbed.

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::build::{self, BuildStatus};
use crate::models::test_run::{self, TestRunStatus};
use crate::models::{git_project, job_trigger};
use crate::repositories::build::NewBuild;
use crate::repositories::{BuildRepository, TestRunRepository, TriggerRepository};

#[derive(Debug, Error)]
pub enum CorrelationError {
    #[error("pipeline id {0} already exists")]
    PipelineIdCollision(String),

    #[error("trigger {0} has no project")]
    DanglingTrigger(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl From<sea_orm::DbErr> for CorrelationError {
    fn from(err: sea_orm::DbErr) -> Self {
        CorrelationError::Storage(err.into())
    }
}

/// A build record with the trigger and project it belongs to.
#[derive(Debug, Clone)]
pub struct ResolvedBuild {
    pub build: build::Model,
    pub trigger: job_trigger::Model,
    pub project: git_project::Model,
}

#[derive(Debug, Clone)]
pub struct ResolvedTestRun {
    pub test_run: test_run::Model,
    pub trigger: job_trigger::Model,
    pub project: git_project::Model,
}

#[derive(Debug, Clone)]
pub struct BuildCorrelator {
    builds: BuildRepository,
    test_runs: TestRunRepository,
    triggers: TriggerRepository,
}

impl BuildCorrelator {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            builds: BuildRepository::new(db.clone()),
            test_runs: TestRunRepository::new(db.clone()),
            triggers: TriggerRepository::new(db),
        }
    }

    /// Records a pending build; a redelivered submission returns the existing row.
    pub async fn record_submission(&self, new: NewBuild) -> Result<build::Model, CorrelationError> {
        let (backend, build_id, target) =
            (new.backend.clone(), new.build_id.clone(), new.target.clone());
        match self.builds.insert(new).await {
            Ok(record) => {
                info!(build_id = %record.build_id, target = %record.target, "Build recorded");
                Ok(record)
            }
            Err(err) if is_unique_violation(&err) => {
                debug!(build_id = %build_id, target = %target, "Build already recorded");
                self.builds
                    .find(&backend, &build_id, &target)
                    .await?
                    .ok_or_else(|| CorrelationError::Storage(err.into()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn trigger_and_project(
        &self,
        trigger_id: Uuid,
    ) -> Result<(job_trigger::Model, git_project::Model), CorrelationError> {
        self.triggers
            .find_with_project(trigger_id)
            .await?
            .ok_or(CorrelationError::DanglingTrigger(trigger_id))
    }

    pub async fn resolve_build(
        &self,
        backend: &str,
        build_id: &str,
        target: &str,
    ) -> Result<Option<ResolvedBuild>, CorrelationError> {
        // Some callbacks only carry the build id.
        let found = if target.is_empty() {
            self.builds.find_any_target(backend, build_id).await?
        } else {
            self.builds.find(backend, build_id, target).await?
        };
        let Some(build) = found else {
            return Ok(None);
        };
        let (trigger, project) = self.trigger_and_project(build.trigger_id).await?;
        Ok(Some(ResolvedBuild {
            build,
            trigger,
            project,
        }))
    }

    pub async fn resolve_test_run(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<ResolvedTestRun>, CorrelationError> {
        let Some(test_run) = self.test_runs.find_by_pipeline_id(pipeline_id).await? else {
            return Ok(None);
        };
        let (trigger, project) = self.trigger_and_project(test_run.trigger_id).await?;
        Ok(Some(ResolvedTestRun {
            test_run,
            trigger,
            project,
        }))
    }

    async fn transition_build(
        &self,
        record: build::Model,
        next: BuildStatus,
        build_logs_url: Option<String>,
    ) -> Result<(build::Model, bool), CorrelationError> {
        let current = record.build_status().unwrap_or(BuildStatus::Pending);
        if !current.can_transition_to(next) {
            debug!(
                build_id = %record.build_id,
                target = %record.target,
                from = %current,
                to = %next,
                "Ignoring non-forward build transition"
            );
            return Ok((record, false));
        }
        let updated = self.builds.set_status(record, next, build_logs_url).await?;
        Ok((updated, true))
    }

    /// Moves a build to `running`; returns `false` when it already got there or further.
    pub async fn mark_build_started(
        &self,
        record: build::Model,
        build_logs_url: Option<String>,
    ) -> Result<(build::Model, bool), CorrelationError> {
        self.transition_build(record, BuildStatus::Running, build_logs_url)
            .await
    }

    pub async fn mark_build_finished(
        &self,
        record: build::Model,
        status: BuildStatus,
        build_logs_url: Option<String>,
    ) -> Result<(build::Model, bool), CorrelationError> {
        if !status.is_terminal() {
            warn!(status = %status, "Finishing a build with a non-terminal status");
        }
        self.transition_build(record, status, build_logs_url).await
    }

    pub async fn mark_test_run(
        &self,
        record: test_run::Model,
        next: TestRunStatus,
        web_url: Option<String>,
    ) -> Result<(test_run::Model, bool), CorrelationError> {
        let current = record.test_status().unwrap_or(TestRunStatus::New);
        if !current.can_transition_to(next) {
            debug!(
                pipeline_id = %record.pipeline_id,
                from = %current,
                to = %next,
                "Ignoring non-forward test run transition"
            );
            return Ok((record, false));
        }
        let updated = self.test_runs.set_status(record, next, web_url).await?;
        Ok((updated, true))
    }

    /// Creates a `new` test run under a fresh uuid v4 pipeline id.
    pub async fn create_test_run(
        &self,
        trigger_id: Uuid,
        target: &str,
        commit_sha: &str,
    ) -> Result<test_run::Model, CorrelationError> {
        let pipeline_id = Uuid::new_v4().to_string();
        match self
            .test_runs
            .insert(trigger_id, &pipeline_id, target, commit_sha)
            .await
        {
            Ok(record) => Ok(record),
            Err(err) if is_unique_violation(&err) => {
                Err(CorrelationError::PipelineIdCollision(pipeline_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Latest successful build of the exact commit; older commits never qualify.
    pub async fn latest_successful_build(
        &self,
        backend: &str,
        trigger_id: Uuid,
        target: &str,
        commit_sha: &str,
    ) -> Result<Option<build::Model>, CorrelationError> {
        Ok(self
            .builds
            .latest_successful(backend, trigger_id, target, commit_sha)
            .await?)
    }
}
