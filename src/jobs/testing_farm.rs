//! Testing Farm submission and result handling.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backends::COPR_BACKEND;
use crate::context::ServiceContext;
use crate::events::{BuildEvent, CommentCommand, TestResult};
use crate::forge::CommitState;
use crate::models::build::{self, BuildStatus};
use crate::models::test_run::TestRunStatus;
use crate::telemetry::HandlerScope;

use super::build_helper::{CoprBuildJobHelper, normalize_target};
use super::copr_build::PERMISSIONS_MSG;
use super::{HandlerError, HandlerInput, HandlerKind, JobHandler, TaskResult, scope_for};

pub const NO_BUILD_MSG: &str = "No successful build found, run the build first.";

/// Build a test run is submitted against.
struct TestSubject<'a> {
    trigger_id: Uuid,
    project_url: &'a str,
    namespace: &'a str,
    repo: &'a str,
    commit_sha: &'a str,
    copr_owner: &'a str,
    copr_project: &'a str,
    target: &'a str,
}

/// Submits tests after a successful build, or on `/packit test`.
pub struct TestingFarmHandler {
    kind: HandlerKind,
    ctx: Arc<ServiceContext>,
    input: HandlerInput,
}

impl TestingFarmHandler {
    pub fn new(kind: HandlerKind, ctx: Arc<ServiceContext>, input: HandlerInput) -> Self {
        Self { kind, ctx, input }
    }

    fn payload(&self, pipeline_id: &str, subject: &TestSubject<'_>) -> Value {
        let config = &self.ctx.config;
        json!({
            "pipeline": {"id": pipeline_id},
            "api": {"token": config.testing_farm_secret.clone().unwrap_or_default()},
            "response-url": format!("{}/testing-farm/results", config.api_url.trim_end_matches('/')),
            "artifact": {
                "repo-name": subject.repo,
                "repo-namespace": subject.namespace,
                "copr-repo-name": format!("{}/{}", subject.copr_owner, subject.copr_project),
                "copr-chroot": subject.target,
                "commit-sha": subject.commit_sha,
                "git-url": format!("{}.git", subject.project_url.trim_end_matches('/')),
                "git-ref": subject.commit_sha,
            }
        })
    }

    /// Creates the test run, submits it and reports the outcome on the test check.
    async fn submit(
        &self,
        helper: &CoprBuildJobHelper,
        subject: TestSubject<'_>,
    ) -> Result<TaskResult, HandlerError> {
        let correlator = self.ctx.correlator();
        let test_run = correlator
            .create_test_run(subject.trigger_id, subject.target, subject.commit_sha)
            .await?;
        let pipeline_id = test_run.pipeline_id.clone();
        let payload = self.payload(&pipeline_id, &subject);
        let url = format!("{}/trigger", self.ctx.testing_farm.api_url());

        debug!(pipeline_id = %pipeline_id, target = subject.target, "Submitting tests");
        let response = self
            .ctx
            .testing_farm
            .submit_test_request(
                &url,
                reqwest::Method::POST,
                &[("Content-Type", "application/json")],
                &payload,
            )
            .await;

        let failure = match response {
            Ok(response) if response.ok => {
                let web_url = response
                    .json
                    .as_ref()
                    .and_then(|body| body.get("url"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                correlator
                    .mark_test_run(test_run, TestRunStatus::Running, Some(web_url.clone()))
                    .await?;
                helper
                    .report_status_to_test_for_chroot(
                        CommitState::Pending,
                        "Tests are running ...",
                        &web_url,
                        subject.target,
                    )
                    .await;
                info!(pipeline_id = %pipeline_id, "Tests submitted");
                return Ok(TaskResult::success("Tests submitted")
                    .with_detail("pipeline_id", pipeline_id));
            }
            Ok(response) => response
                .json
                .as_ref()
                .and_then(|body| body.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(response.text),
            Err(err) => err.to_string(),
        };

        warn!(pipeline_id = %pipeline_id, error = %failure, "Testing Farm rejected the request");
        correlator
            .mark_test_run(test_run, TestRunStatus::Error, None)
            .await?;
        let msg = format!("Failed to submit tests: {failure}");
        helper
            .report_status_to_test_for_chroot(CommitState::Failure, &msg, "", subject.target)
            .await;
        Ok(TaskResult::failure(msg).with_detail("pipeline_id", pipeline_id))
    }

    /// Final status of the build that triggered tests.
    ///
    /// The stored record wins once it is terminal; otherwise the callback's
    /// status code is used and, when that is missing too, Copr is asked.
    async fn build_outcome(&self, event: &BuildEvent, record: &build::Model) -> BuildStatus {
        if let Some(status) = record.build_status().filter(|status| status.is_terminal()) {
            return status;
        }
        if event.status.is_some() {
            return event.end_status();
        }
        match self.ctx.builds.get_build_info(&event.build_id).await {
            Ok(info) => info.end_status(),
            Err(err) => {
                warn!(build_id = %event.build_id, error = %err, "Failed to fetch build info");
                BuildStatus::Error
            }
        }
    }

    async fn run_after_build(&self) -> Result<TaskResult, HandlerError> {
        let data = &self.input.data;
        let Some(event) = data.event.build_event() else {
            return Err(HandlerError::Config(format!(
                "{} cannot handle {} events",
                self.kind, data.trigger
            )));
        };

        let Some(resolved) = self
            .ctx
            .correlator()
            .resolve_build(&event.backend, &event.build_id, &event.target)
            .await?
        else {
            return Ok(TaskResult::failure("Build not found"));
        };

        let outcome = self.build_outcome(event, &resolved.build).await;
        if outcome != BuildStatus::Success {
            debug!(build_id = %event.build_id, status = %outcome, "Build did not succeed, not testing");
            return Ok(TaskResult::success("Build did not succeed, tests not submitted")
                .with_detail("build_id", event.build_id.clone()));
        }

        let project = self.ctx.forges.project(&resolved.project.project_url)?;
        let helper = CoprBuildJobHelper::for_commit(
            &self.ctx,
            &self.input.package_config,
            data.config_trigger,
            project,
            &resolved.build.commit_sha,
            resolved.trigger.pr_id(),
        );
        let subject = TestSubject {
            trigger_id: resolved.trigger.id,
            project_url: &resolved.project.project_url,
            namespace: &resolved.project.namespace,
            repo: &resolved.project.repo_name,
            commit_sha: &resolved.build.commit_sha,
            copr_owner: &resolved.build.owner,
            copr_project: &resolved.build.project_name,
            target: &resolved.build.target,
        };
        self.submit(&helper, subject).await
    }

    async fn run_from_comment(&self) -> Result<TaskResult, HandlerError> {
        let data = &self.input.data;
        let project = self.ctx.forges.project(&data.project_url)?;
        let helper = CoprBuildJobHelper::for_commit(
            &self.ctx,
            &self.input.package_config,
            data.config_trigger,
            project.clone(),
            &data.commit_sha,
            data.pr_id,
        );

        let login = data.user_login.as_deref().unwrap_or_default();
        let allowed = self.ctx.config.is_admin(login)
            || (!login.is_empty() && project.can_merge_pr(login).await?);
        if !allowed {
            warn!(user = login, "User is not allowed to trigger tests");
            helper.reporter().comment(PERMISSIONS_MSG).await;
            return Ok(TaskResult::success(PERMISSIONS_MSG));
        }

        let targets = helper.targets().tests_targets();
        if targets.is_empty() {
            return Ok(TaskResult::success("No test targets configured"));
        }

        let correlator = self.ctx.correlator();
        let mut outcomes = Map::new();
        let mut failed = Vec::new();
        for target in targets {
            // Only a build of the commit under test qualifies.
            let Some(build) = correlator
                .latest_successful_build(COPR_BACKEND, data.trigger_id, &target, &data.commit_sha)
                .await?
            else {
                helper
                    .report_status_to_test_for_chroot(
                        CommitState::Failure,
                        NO_BUILD_MSG,
                        "",
                        &target,
                    )
                    .await;
                outcomes.insert(target.clone(), json!({"success": false, "msg": NO_BUILD_MSG}));
                failed.push(target);
                continue;
            };

            let subject = TestSubject {
                trigger_id: data.trigger_id,
                project_url: &data.project_url,
                namespace: &data.namespace,
                repo: &data.repo,
                commit_sha: &build.commit_sha,
                copr_owner: &build.owner,
                copr_project: &build.project_name,
                target: &target,
            };
            let result = self.submit(&helper, subject).await?;
            if !result.success {
                failed.push(target.clone());
            }
            let mut outcome = result.details.extra;
            outcome.insert("success".to_string(), Value::Bool(result.success));
            outcome.insert("msg".to_string(), Value::String(result.details.msg));
            outcomes.insert(target, Value::Object(outcome));
        }

        let submitted = outcomes.len() - failed.len();
        let result = if failed.is_empty() {
            TaskResult::success(format!("Tests submitted for {submitted} target(s)"))
        } else {
            TaskResult::failure(format!("Tests not submitted for {}", failed.join(", ")))
        };
        Ok(result
            .with_detail("submitted", submitted)
            .with_detail("targets", Value::Object(outcomes)))
    }
}

#[async_trait]
impl JobHandler for TestingFarmHandler {
    fn kind(&self) -> HandlerKind {
        self.kind
    }

    fn tag_info(&self) -> HandlerScope {
        scope_for(self.kind, &self.input.data)
    }

    async fn pre_check(&self) -> bool {
        let data = &self.input.data;
        if self.kind == HandlerKind::PrCommentTestingFarm {
            return data.event.comment_command() == Some(CommentCommand::Test);
        }

        let Some(event) = data.event.build_event() else {
            return false;
        };
        if event.backend != COPR_BACKEND {
            return false;
        }
        // A missing status is settled in `run` against the stored build.
        if event.status.is_some() && event.end_status() != BuildStatus::Success {
            debug!(build_id = %event.build_id, "Build did not succeed, not testing");
            return false;
        }
        let targets = super::build_helper::JobTargets::new(
            &self.input.package_config,
            data.config_trigger,
            self.ctx.config.deployment.check_prefix(),
        );
        let chroot = normalize_target(&event.target);
        if !targets.tests_targets().contains(&chroot) {
            debug!(chroot = %chroot, "Chroot is not a test target");
            return false;
        }
        true
    }

    async fn run(&mut self) -> Result<TaskResult, HandlerError> {
        match self.kind {
            HandlerKind::PrCommentTestingFarm => self.run_from_comment().await,
            _ => self.run_after_build().await,
        }
    }
}

fn result_status(result: TestResult) -> (CommitState, &'static str) {
    match result {
        TestResult::Passed => (CommitState::Success, "Tests passed ..."),
        TestResult::Failed => (CommitState::Failure, "Tests failed ..."),
        TestResult::Error => (CommitState::Error, "Tests error ..."),
        TestResult::Unknown => (CommitState::Error, "Tests result unknown ..."),
    }
}

/// Records a Testing Farm result and reports it on the test check.
pub struct TestingFarmResultsHandler {
    ctx: Arc<ServiceContext>,
    input: HandlerInput,
}

impl TestingFarmResultsHandler {
    pub fn new(ctx: Arc<ServiceContext>, input: HandlerInput) -> Self {
        Self { ctx, input }
    }
}

#[async_trait]
impl JobHandler for TestingFarmResultsHandler {
    fn kind(&self) -> HandlerKind {
        HandlerKind::TestingFarmResults
    }

    fn tag_info(&self) -> HandlerScope {
        scope_for(HandlerKind::TestingFarmResults, &self.input.data)
    }

    async fn run(&mut self) -> Result<TaskResult, HandlerError> {
        let data = &self.input.data;
        let Some(result) = data.event.test_result() else {
            return Err(HandlerError::Config(format!(
                "testing_farm_results cannot handle {} events",
                data.trigger
            )));
        };

        let correlator = self.ctx.correlator();
        let Some(resolved) = correlator.resolve_test_run(&result.pipeline_id).await? else {
            return Ok(TaskResult::failure("Test run not found"));
        };

        let target = resolved.test_run.target.clone();
        let commit_sha = resolved.test_run.commit_sha.clone();
        let (_, changed) = correlator
            .mark_test_run(
                resolved.test_run,
                result.result.test_run_status(),
                result.log_url.clone(),
            )
            .await?;
        if !changed {
            return Ok(TaskResult::success("Test result already processed"));
        }

        let project = self.ctx.forges.project(&resolved.project.project_url)?;
        let helper = CoprBuildJobHelper::for_commit(
            &self.ctx,
            &self.input.package_config,
            data.config_trigger,
            project,
            &commit_sha,
            resolved.trigger.pr_id(),
        );
        let (state, description) = result_status(result.result);
        let check = helper.targets().test_check(&target);
        helper
            .reporter()
            .report(
                state,
                description,
                result.log_url.as_deref().unwrap_or_default(),
                std::slice::from_ref(&check),
            )
            .await;

        Ok(TaskResult::success(description).with_detail("pipeline_id", result.pipeline_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_map_to_states_and_descriptions() {
        assert_eq!(
            result_status(TestResult::Passed),
            (CommitState::Success, "Tests passed ...")
        );
        assert_eq!(
            result_status(TestResult::Failed),
            (CommitState::Failure, "Tests failed ...")
        );
        assert_eq!(result_status(TestResult::Error).0, CommitState::Error);
        assert_eq!(
            result_status(TestResult::Unknown),
            (CommitState::Error, "Tests result unknown ...")
        );
    }
}
