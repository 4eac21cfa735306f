//! Copr build submission and build state callbacks.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::backends::{BuildRequest, COPR_BACKEND};
use crate::config::Deployment;
use crate::context::ServiceContext;
use crate::events::{CommentCommand, Event};
use crate::forge::CommitState;
use crate::models::build::BuildStatus;
use crate::package_config::JobType;
use crate::reporting::CONGRATULATION_MARKER;
use crate::repositories::build::NewBuild;
use crate::telemetry::HandlerScope;

use super::build_helper::{CoprBuildJobHelper, JobTargets};
use super::{HandlerError, HandlerInput, HandlerKind, JobHandler, TaskResult, scope_for};

pub const PERMISSIONS_MSG: &str =
    "Only users with write or admin permissions to the repository can trigger Packit-as-a-Service";

/// Submits a Copr build for a PR, branch push, release or `/packit build` comment.
pub struct CoprBuildHandler {
    kind: HandlerKind,
    ctx: Arc<ServiceContext>,
    input: HandlerInput,
}

impl CoprBuildHandler {
    pub fn new(kind: HandlerKind, ctx: Arc<ServiceContext>, input: HandlerInput) -> Self {
        Self { kind, ctx, input }
    }

    /// Copr project name; job metadata wins over `{namespace}-{repo}-{identifier}`.
    fn copr_project(&self) -> String {
        if let Some(project) = &self.input.job_config.metadata.project {
            return project.clone();
        }
        let data = &self.input.data;
        let mut name = format!(
            "{}-{}-{}",
            data.namespace.replace('/', "-"),
            data.repo,
            data.identifier
        );
        if self.ctx.config.deployment == Deployment::Stg {
            name.push_str("-stg");
        }
        name
    }

    fn copr_owner(&self) -> String {
        self.input
            .job_config
            .metadata
            .owner
            .clone()
            .unwrap_or_else(|| self.ctx.config.copr_owner.clone())
    }

    /// Whether the event author may trigger builds.
    async fn is_allowed(&self, helper: &CoprBuildJobHelper) -> Result<bool, HandlerError> {
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
impl JobHandler for CoprBuildHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn tag_info(&self) -> HandlerScope {
        scope_for(self.kind, &self.input.data)
    }

    async fn pre_check(&self) -> bool {
        let data = &self.input.data;
        let job = &self.input.job_config;

        if self.kind == HandlerKind::PrCommentCoprBuild
            && data.event.comment_command() != Some(CommentCommand::Build)
        {
            debug!("Comment is not a build command");
            return false;
        }

        if self.kind == HandlerKind::PushCoprBuild && data.git_ref.as_deref() != Some(job.branch()) {
            debug!(
                git_ref = ?data.git_ref,
                branch = job.branch(),
                "Push is not to the configured branch"
            );
            return false;
        }

        // Runs implied by a tests job are redundant when a build job exists.
        if job.job_type == JobType::Tests {
            let targets = JobTargets::new(
                &self.input.package_config,
                data.config_trigger,
                self.ctx.config.deployment.check_prefix(),
            );
            if targets.job_build().is_some() {
                debug!("Skipping build implied by tests, a build job is configured");
                return false;
            }
        }
        true
    }

    async fn run(&mut self) -> Result<TaskResult, HandlerError> {
        let data = &self.input.data;
        let project = self.ctx.forges.project(&data.project_url)?;
        let helper = CoprBuildJobHelper::for_commit(
            &self.ctx,
            &self.input.package_config,
            data.config_trigger,
            project,
            &data.commit_sha,
            data.pr_id,
        );

        if !self.is_allowed(&helper).await? {
            warn!(user = ?data.user_login, "User is not allowed to trigger builds");
            if matches!(data.event, Event::PrComment { .. }) {
                helper.reporter().comment(PERMISSIONS_MSG).await;
            } else {
                helper
                    .report_status_to_all(CommitState::Failure, PERMISSIONS_MSG, "")
                    .await;
            }
            return Ok(TaskResult::success(PERMISSIONS_MSG));
        }

        helper
            .report_status_to_all(CommitState::Pending, "Submitting the build...", "")
            .await;

        let chroots: Vec<String> = helper.targets().build_targets().into_iter().collect();
        let request = BuildRequest {
            owner: self.copr_owner(),
            project: self.copr_project(),
            clone_url: data.project_url.clone(),
            committish: data.commit_sha.clone(),
            chroots: chroots.clone(),
        };

        let submission = match self.ctx.builds.submit_build(&request).await {
            Ok(submission) => submission,
            Err(err) => {
                let msg = format!("Submit of the build failed: {err}");
                helper
                    .report_status_to_all(CommitState::Failure, &msg, "")
                    .await;
                return Ok(TaskResult::failure(msg));
            }
        };

        let correlator = self.ctx.correlator();
        for target in &chroots {
            correlator
                .record_submission(NewBuild {
                    trigger_id: data.trigger_id,
                    backend: self.ctx.builds.name().to_string(),
                    build_id: submission.build_id.clone(),
                    target: target.clone(),
                    owner: request.owner.clone(),
                    project_name: request.project.clone(),
                    commit_sha: data.commit_sha.clone(),
                    web_url: Some(submission.web_url.clone()),
                })
                .await?;
        }

        helper
            .report_status_to_all(
                CommitState::Pending,
                "Starting RPM build...",
                &submission.web_url,
            )
            .await;

        info!(build_id = %submission.build_id, chroots = ?chroots, "Copr build submitted");
        Ok(TaskResult::success("Build submitted")
            .with_detail("build_id", submission.build_id)
            .with_detail("web_url", submission.web_url))
    }
}

fn congratulation_body(owner: &str, project_name: &str) -> String {
    format!(
        "{CONGRATULATION_MARKER}\n\n\
         You can install the built RPMs by following these steps:\n\n\
         * `sudo yum install -y dnf-plugins-core` on RHEL 8\n\
         * `sudo dnf install -y dnf-plugins-core` on Fedora\n\
         * `dnf copr enable {owner}/{project_name}`\n\
         * And now you can install the packages.\n\
         \nPlease note that the RPMs should be used only in a testing environment."
    )
}

/// Reacts to Copr build start and end callbacks.
pub struct CoprBuildStatusHandler {
    kind: HandlerKind,
    ctx: Arc<ServiceContext>,
    input: HandlerInput,
}

impl CoprBuildStatusHandler {
    pub fn new(kind: HandlerKind, ctx: Arc<ServiceContext>, input: HandlerInput) -> Self {
        Self { kind, ctx, input }
    }
}

#[async_trait]
impl JobHandler for CoprBuildStatusHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn tag_info(&self) -> HandlerScope {
        scope_for(self.kind, &self.input.data)
    }

    async fn pre_check(&self) -> bool {
        if let Some(event) = self.input.data.event.build_event()
            && event.backend != COPR_BACKEND
        {
            return false;
        }
        if self.input.job_config.job_type == JobType::Tests {
            let targets = JobTargets::new(
                &self.input.package_config,
                self.input.data.config_trigger,
                self.ctx.config.deployment.check_prefix(),
            );
            if targets.job_build().is_some() {
                return false;
            }
        }
        true
    }

    async fn run(&mut self) -> Result<TaskResult, HandlerError> {
        let data = &self.input.data;
        let Some(event) = data.event.build_event() else {
            return Err(HandlerError::Config(format!(
                "{} cannot handle {} events",
                self.kind, data.trigger
            )));
        };

        let correlator = self.ctx.correlator();
        let Some(resolved) = correlator
            .resolve_build(&event.backend, &event.build_id, &event.target)
            .await?
        else {
            return Ok(TaskResult::failure("Build not found"));
        };

        let project = self.ctx.forges.project(&resolved.project.project_url)?;
        let helper = CoprBuildJobHelper::for_commit(
            &self.ctx,
            &self.input.package_config,
            data.config_trigger,
            project,
            &resolved.build.commit_sha,
            resolved.trigger.pr_id(),
        );
        // Relayed end messages occasionally lack the status code; ask Copr.
        let backend_info = if self.kind == HandlerKind::CoprBuildEnd && event.status.is_none() {
            match self.ctx.builds.get_build_info(&event.build_id).await {
                Ok(info) => Some(info),
                Err(err) => {
                    warn!(build_id = %event.build_id, error = %err, "Failed to fetch build info");
                    None
                }
            }
        } else {
            None
        };
        let pkg = event
            .pkg
            .as_deref()
            .or_else(|| backend_info.as_ref().and_then(|info| info.pkg.as_deref()));
        let logs_url = self.ctx.builds.build_logs_url(
            &event.owner,
            &event.project_name,
            &event.target,
            &event.build_id,
            pkg,
        );
        let web_url = resolved.build.web_url.clone().unwrap_or_default();

        if self.kind == HandlerKind::CoprBuildStart {
            let (_, changed) = correlator
                .mark_build_started(resolved.build, logs_url.clone())
                .await?;
            if !changed {
                return Ok(TaskResult::success("Build start already processed"));
            }
            let url = logs_url.unwrap_or(web_url);
            helper
                .report_status_to_all_for_chroot(
                    CommitState::Pending,
                    "RPM build is in progress...",
                    &url,
                    &event.target,
                )
                .await;
            return Ok(TaskResult::success("Build started").with_detail("build_id", event.build_id.clone()));
        }

        let status = backend_info
            .as_ref()
            .map(|info| info.end_status())
            .unwrap_or_else(|| event.end_status());
        let (record, changed) = correlator
            .mark_build_finished(resolved.build, status, logs_url)
            .await?;
        if !changed {
            return Ok(TaskResult::success("Build end already processed"));
        }

        if status != BuildStatus::Success {
            helper
                .report_status_to_all_for_chroot(
                    CommitState::Failure,
                    "RPMs failed to be built.",
                    &web_url,
                    &event.target,
                )
                .await;
            return Ok(TaskResult::failure("RPMs failed to be built.")
                .with_detail("build_id", record.build_id));
        }

        helper
            .report_status_to_build_for_chroot(
                CommitState::Success,
                "RPMs were built successfully.",
                &web_url,
                &event.target,
            )
            .await;

        let reporter = helper.reporter();
        if reporter.pr_id().is_some()
            && self.input.job_config.notify_successful_build()
            && !reporter
                .was_last_comment_congratulation(&self.ctx.config.service_account)
                .await
        {
            reporter
                .comment(&congratulation_body(&event.owner, &event.project_name))
                .await;
        }

        Ok(TaskResult::success("RPMs were built successfully.").with_detail("build_id", record.build_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn congratulation_starts_with_marker_and_names_the_copr() {
        let body = congratulation_body("packit", "packit-hello-world-12");
        assert!(body.starts_with(CONGRATULATION_MARKER));
        assert!(body.contains("`dnf copr enable packit/packit-hello-world-12`"));
    }
}
