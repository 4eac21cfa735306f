//! Koji production (scratch) builds and their task state callbacks.
//!
//! Koji builds one target per task, so a job with several targets submits
//! several tasks and records one build row for each.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::backends::{BuildRequest, KOJI_BACKEND};
use crate::context::ServiceContext;
use crate::events::Event;
use crate::forge::CommitState;
use crate::models::build::BuildStatus;
use crate::repositories::build::NewBuild;
use crate::telemetry::HandlerScope;

use super::build_helper::KojiBuildJobHelper;
use super::copr_build::PERMISSIONS_MSG;
use super::{HandlerError, HandlerInput, HandlerKind, JobHandler, TaskResult, scope_for};

/// Submits one Koji scratch build per configured target.
pub struct KojiBuildHandler {
    kind: HandlerKind,
    ctx: Arc<ServiceContext>,
    input: HandlerInput,
}

impl KojiBuildHandler {
    pub fn new(kind: HandlerKind, ctx: Arc<ServiceContext>, input: HandlerInput) -> Self {
        Self { kind, ctx, input }
    }

    async fn is_allowed(&self, helper: &KojiBuildJobHelper) -> Result<bool, HandlerError> {
        let data = &self.input.data;
        if !data.requires_permission_check() {
            return Ok(true);
        }
        let Some(login) = data.user_login.as_deref() else {
            return Ok(false);
        };
        if self.ctx.config.is_admin(login) {
            return Ok(true);
        }
        Ok(helper.reporter().project().can_merge_pr(login).await?)
    }
}

#[async_trait]
impl JobHandler for KojiBuildHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn tag_info(&self) -> HandlerScope {
        scope_for(self.kind, &self.input.data)
    }

    async fn pre_check(&self) -> bool {
        let data = &self.input.data;
        let job = &self.input.job_config;
        if self.kind == HandlerKind::PushKojiBuild && data.git_ref.as_deref() != Some(job.branch()) {
            debug!(
                git_ref = ?data.git_ref,
                branch = job.branch(),
                "Push is not to the configured branch"
            );
            return false;
        }
        true
    }

    async fn run(&mut self) -> Result<TaskResult, HandlerError> {
        let data = &self.input.data;
        let project = self.ctx.forges.project(&data.project_url)?;
        let helper = KojiBuildJobHelper::for_commit(
            &self.ctx,
            &self.input.package_config,
            data.config_trigger,
            project,
            &data.commit_sha,
            data.pr_id,
        );

        if !self.is_allowed(&helper).await? {
            warn!(user = ?data.user_login, "User is not allowed to trigger production builds");
            helper
                .report_status_to_all(CommitState::Failure, PERMISSIONS_MSG, "")
                .await;
            return Ok(TaskResult::success(PERMISSIONS_MSG));
        }

        helper
            .report_status_to_all(CommitState::Pending, "Submitting the build...", "")
            .await;

        let correlator = self.ctx.correlator();
        let mut outcomes = Map::new();
        let mut failed = Vec::new();
        for target in helper.targets().koji_targets() {
            let request = BuildRequest {
                owner: String::new(),
                project: String::new(),
                clone_url: data.project_url.clone(),
                committish: data.commit_sha.clone(),
                chroots: vec![target.clone()],
            };
            let submission = match self.ctx.koji.submit_build(&request).await {
                Ok(submission) => submission,
                Err(err) => {
                    let msg = format!("Submit of the build failed: {err}");
                    helper
                        .report_status_for_target(CommitState::Failure, &msg, "", &target)
                        .await;
                    outcomes.insert(target.clone(), json!({"success": false, "msg": msg}));
                    failed.push(target);
                    continue;
                }
            };

            correlator
                .record_submission(NewBuild {
                    trigger_id: data.trigger_id,
                    backend: KOJI_BACKEND.to_string(),
                    build_id: submission.build_id.clone(),
                    target: target.clone(),
                    owner: String::new(),
                    project_name: String::new(),
                    commit_sha: data.commit_sha.clone(),
                    web_url: Some(submission.web_url.clone()),
                })
                .await?;
            helper
                .report_status_for_target(
                    CommitState::Pending,
                    "Building RPM ...",
                    &submission.web_url,
                    &target,
                )
                .await;
            info!(task_id = %submission.build_id, target = %target, "Koji build submitted");
            outcomes.insert(
                target,
                json!({
                    "success": true,
                    "build_id": submission.build_id,
                    "web_url": submission.web_url,
                }),
            );
        }

        let result = if failed.is_empty() {
            TaskResult::success(format!("Koji builds submitted for {} target(s)", outcomes.len()))
        } else {
            TaskResult::failure(format!("Koji build submission failed for {}", failed.join(", ")))
        };
        Ok(result.with_detail("targets", Value::Object(outcomes)))
    }
}

/// Reports Koji task state changes to the production build checks.
pub struct KojiBuildReportHandler {
    ctx: Arc<ServiceContext>,
    input: HandlerInput,
}

impl KojiBuildReportHandler {
    pub fn new(ctx: Arc<ServiceContext>, input: HandlerInput) -> Self {
        Self { ctx, input }
    }
}

#[async_trait]
impl JobHandler for KojiBuildReportHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::KojiBuildReport
    }

    fn tag_info(&self) -> HandlerScope {
        scope_for(HandlerKind::KojiBuildReport, &self.input.data)
    }

    async fn pre_check(&self) -> bool {
        self.input
            .data
            .event
            .build_event()
            .is_some_and(|event| event.backend == KOJI_BACKEND)
    }

    async fn run(&mut self) -> Result<TaskResult, HandlerError> {
        let data = &self.input.data;
        let Some(event) = data.event.build_event() else {
            return Err(HandlerError::Config(format!(
                "{} cannot handle {} events",
                HandlerKind::KojiBuildReport,
                data.trigger
            )));
        };

        let correlator = self.ctx.correlator();
        let Some(resolved) = correlator
            .resolve_build(KOJI_BACKEND, &event.build_id, &event.target)
            .await?
        else {
            return Ok(TaskResult::failure("Build not found"));
        };

        let project = self.ctx.forges.project(&resolved.project.project_url)?;
        let helper = KojiBuildJobHelper::for_commit(
            &self.ctx,
            &self.input.package_config,
            data.config_trigger,
            project,
            &resolved.build.commit_sha,
            resolved.trigger.pr_id(),
        );
        let target = resolved.build.target.clone();
        let web_url = resolved
            .build
            .web_url
            .clone()
            .unwrap_or_else(|| self.ctx.koji.web_url("", "", &event.build_id));
        // Logs live under the buildArch child task once it exists.
        let logs_url = event.rpm_build_task_id.and_then(|task_id| {
            self.ctx
                .koji
                .build_logs_url("", "", &target, &task_id.to_string(), None)
        });

        if matches!(data.event, Event::BuildStart(_)) {
            let (_, changed) = correlator
                .mark_build_started(resolved.build, logs_url)
                .await?;
            if !changed {
                return Ok(TaskResult::success("Build start already processed"));
            }
            helper
                .report_status_for_target(
                    CommitState::Running,
                    "RPM build is in progress...",
                    &web_url,
                    &target,
                )
                .await;
            return Ok(TaskResult::success("Build started").with_detail("build_id", event.build_id.clone()));
        }

        let status = event.end_status();
        let (record, changed) = correlator
            .mark_build_finished(resolved.build, status, logs_url)
            .await?;
        if !changed {
            return Ok(TaskResult::success("Build end already processed"));
        }

        let url = record.build_logs_url.clone().unwrap_or(web_url);
        if status == BuildStatus::Success {
            helper
                .report_status_for_target(
                    CommitState::Success,
                    "RPMs were built successfully.",
                    &url,
                    &target,
                )
                .await;
            return Ok(TaskResult::success("RPMs were built successfully.")
                .with_detail("build_id", record.build_id));
        }

        helper
            .report_status_for_target(CommitState::Failure, "RPMs failed to be built.", &url, &target)
            .await;
        Ok(TaskResult::failure("RPMs failed to be built.").with_detail("build_id", record.build_id))
    }
}
