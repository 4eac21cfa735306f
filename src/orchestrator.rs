//! Event processing: trigger resolution, job matching and sequential execution.
//!
//! [`JobOrchestrator::plan`] turns one event into task signatures (or a
//! terminal result); [`run_task`] executes one signature. `process` does both
//! inline and aggregates the results by job key.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::allowlist::{
    NOT_ALLOWED_MSG, Registration, approval_issue_body, approval_issue_title, not_allowed_comment,
};
use crate::context::ServiceContext;
use crate::events::{Event, EventData, InstallationEvent, TriggerKind};
use crate::forge::{CommitState, ForgeKind, ForgeProject};
use crate::jobs::build_helper::{CoprBuildJobHelper, KojiBuildJobHelper};
use crate::jobs::{HandlerInput, HandlerKind, TaskResult, create_handler, match_jobs};
use crate::models::job_trigger::TriggerEntityKind;
use crate::models::{git_project, job_trigger};
use crate::package_config::PackageConfig;

pub const NO_CONFIG_MSG: &str = "No packit config in repo";
pub const BUILD_NOT_FOUND_MSG: &str = "Build not found";
pub const TEST_RUN_NOT_FOUND_MSG: &str = "Test run not found";

/// Serialized handler invocation, as carried by the task queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSignature {
    pub task_name: String,
    pub handler: HandlerKind,
    pub package_config: Value,
    pub job_config: Value,
    /// Serialized [`EventData`]
    pub event: Value,
}

impl TaskSignature {
    fn new(handler: HandlerKind, input: &HandlerInput) -> Result<Self> {
        Ok(Self {
            task_name: handler.task_name().to_string(),
            handler,
            package_config: serde_json::to_value(&input.package_config)?,
            job_config: serde_json::to_value(&input.job_config)?,
            event: serde_json::to_value(&input.data)?,
        })
    }

    fn input(&self) -> Result<HandlerInput> {
        Ok(HandlerInput {
            package_config: serde_json::from_value(self.package_config.clone())
                .context("invalid package config")?,
            job_config: serde_json::from_value(self.job_config.clone())
                .context("invalid job config")?,
            data: serde_json::from_value(self.event.clone()).context("invalid event data")?,
        })
    }
}

/// What an event turned into.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Handlers to run, in order.
    Tasks(Vec<TaskSignature>),
    /// A single final result; nothing runs.
    Terminal(TaskResult),
    /// Not actionable.
    Ignored,
}

fn terminal(trigger: TriggerKind, result: TaskResult) -> BTreeMap<String, TaskResult> {
    BTreeMap::from([(trigger.as_str().to_string(), result)])
}

/// `{job_type}-{timestamp}`, suffixed until unique within `taken`.
fn job_key(job_type: &str, taken: &BTreeMap<String, TaskResult>) -> String {
    let stamp = Utc::now().format("%Y-%m-%d-%H-%M-%S-%6f").to_string();
    job_key_at(job_type, &stamp, taken)
}

fn job_key_at(job_type: &str, stamp: &str, taken: &BTreeMap<String, TaskResult>) -> String {
    let base = format!("{job_type}-{stamp}");
    if !taken.contains_key(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{base}-{n}"))
        .find(|key| !taken.contains_key(key))
        .unwrap_or(base)
}

/// Executes one task signature; the result map holds a single entry.
pub async fn run_task(ctx: Arc<ServiceContext>, signature: TaskSignature) -> BTreeMap<String, TaskResult> {
    let mut results = BTreeMap::new();
    run_task_into(&ctx, signature, &mut results).await;
    results
}

async fn run_task_into(
    ctx: &Arc<ServiceContext>,
    signature: TaskSignature,
    results: &mut BTreeMap<String, TaskResult>,
) {
    let kind = match HandlerKind::from_task_name(&signature.task_name) {
        Some(kind) if kind == signature.handler => kind,
        _ => {
            error!(task_name = %signature.task_name, handler = %signature.handler, "Unknown task");
            results.insert(
                signature.task_name.clone(),
                TaskResult::failure(format!("Unknown task {}", signature.task_name)),
            );
            return;
        }
    };
    let input = match signature.input() {
        Ok(input) => input,
        Err(err) => {
            error!(task_name = %signature.task_name, error = %err, "Malformed task signature");
            results.insert(signature.task_name, TaskResult::failure(err.to_string()));
            return;
        }
    };

    let key = job_key(input.job_config.job_type.as_str(), results);
    let handler = create_handler(kind, ctx.clone(), input);
    let result = ctx.runtime.run_n_clean(handler, &key).await;
    if !result.success {
        error!(job_key = %key, handler = %kind, msg = %result.msg(), "Job failed");
    }
    results.insert(key, result);
}

pub struct JobOrchestrator {
    ctx: Arc<ServiceContext>,
}

impl JobOrchestrator {
    pub fn new(ctx: Arc<ServiceContext>) -> Self {
        Self { ctx }
    }

    /// Processes one event end to end and returns the results by job key.
    #[instrument(skip_all, fields(trigger = %event.trigger_kind()))]
    pub async fn process(&self, event: Event) -> BTreeMap<String, TaskResult> {
        let trigger = event.trigger_kind();
        let plan = match self.plan(&event).await {
            Ok(plan) => plan,
            Err(err) => {
                error!(error = %err, "Failed to process event");
                return terminal(trigger, TaskResult::failure(err.to_string()));
            }
        };

        match plan {
            Plan::Ignored => BTreeMap::new(),
            Plan::Terminal(result) => terminal(trigger, result),
            Plan::Tasks(signatures) => {
                let mut results = BTreeMap::new();
                for signature in signatures {
                    run_task_into(&self.ctx, signature, &mut results).await;
                }
                info!(jobs = results.len(), "Event processed");
                results
            }
        }
    }

    /// Resolves the event and selects the handlers that should run for it.
    pub async fn plan(&self, event: &Event) -> Result<Plan> {
        if let Event::Installation(installation) = event {
            return Ok(Plan::Terminal(self.register_installation(installation).await?));
        }
        let trigger = event.trigger_kind();
        if self.ctx.registry.handlers_for(trigger).next().is_none() {
            debug!(trigger = %trigger, "No handler listens to this event");
            return Ok(Plan::Terminal(TaskResult::failure(NO_CONFIG_MSG)));
        }

        let resolved = if trigger.is_callback() {
            self.resolve_callback(event).await?
        } else {
            self.resolve_forge_event(event).await?
        };
        let (data, project, config_ref) = match resolved {
            Resolution::Found(data, project, config_ref) => (data, project, config_ref),
            Resolution::Terminal(result) => return Ok(Plan::Terminal(result)),
            Resolution::Ignored => return Ok(Plan::Ignored),
        };

        let Some(package_config) = PackageConfig::fetch(project.as_ref(), &config_ref).await?
        else {
            return Ok(Plan::Terminal(TaskResult::failure(NO_CONFIG_MSG)));
        };

        if let Some(denied) = self.check_approval(&data, &project, &package_config).await? {
            return Ok(Plan::Terminal(denied));
        }

        let matched = match_jobs(
            &self.ctx.registry,
            trigger,
            data.config_trigger,
            &package_config.jobs,
        );
        if matched.is_empty() {
            return Ok(Plan::Terminal(TaskResult::failure(NO_CONFIG_MSG)));
        }

        let mut signatures = Vec::new();
        for matched in matched {
            let input = HandlerInput {
                package_config: package_config.clone(),
                job_config: matched.job_config,
                data: data.clone(),
            };
            let handler = create_handler(matched.handler, self.ctx.clone(), input.clone());
            if !handler.pre_check().await {
                info!(handler = %matched.handler, job_index = matched.job_index, "Pre-check failed, skipping job");
                continue;
            }
            signatures.push(TaskSignature::new(matched.handler, &input)?);
        }
        Ok(Plan::Tasks(signatures))
    }

    /// Records the installing account and asks maintainers to approve it.
    async fn register_installation(&self, event: &InstallationEvent) -> Result<TaskResult> {
        match self.ctx.allowlist().register_installation(event).await? {
            Registration::AlreadyApproved => {
                return Ok(TaskResult::success("Account is already approved"));
            }
            Registration::Waiting { new: false } => {
                return Ok(TaskResult::success("Account is already waiting for approval"));
            }
            Registration::Waiting { new: true } => {}
        }

        let result = TaskResult::success("Account is waiting for approval")
            .with_detail("account", event.account_login.clone());
        let Some(url) = self.ctx.config.notifications_project_url.as_deref() else {
            warn!(account = %event.account_login, "No notifications project, approval issue not created");
            return Ok(result);
        };
        let project = self.ctx.forges.project(url)?;
        let Some(issues) = project.issues() else {
            warn!(project = %url, "Notifications project cannot hold issues");
            return Ok(result);
        };
        let issue = issues
            .create_issue(&approval_issue_title(event), &approval_issue_body(event))
            .await?;
        info!(account = %event.account_login, issue, "Approval issue created");
        Ok(result.with_detail("issue", issue))
    }

    /// Refuses forge events from GitHub accounts that are not approved.
    async fn check_approval(
        &self,
        data: &EventData,
        project: &Arc<dyn ForgeProject>,
        package_config: &PackageConfig,
    ) -> Result<Option<TaskResult>> {
        if !self.ctx.config.require_approval
            || data.forge != ForgeKind::Github
            || data.trigger.is_callback()
        {
            return Ok(None);
        }
        let allowed = self
            .ctx
            .allowlist()
            .is_allowed(&data.namespace, data.user_login.as_deref())
            .await?;
        if allowed {
            return Ok(None);
        }

        let user = data.user_login.as_deref().unwrap_or("unknown");
        warn!(namespace = %data.namespace, user, "Account is not allowlisted");
        match &data.event {
            Event::PullRequest { .. } => {
                let copr = CoprBuildJobHelper::for_commit(
                    &self.ctx,
                    package_config,
                    data.config_trigger,
                    project.clone(),
                    &data.commit_sha,
                    data.pr_id,
                );
                copr.report_status_to_all(CommitState::Error, NOT_ALLOWED_MSG, "")
                    .await;
                let koji = KojiBuildJobHelper::for_commit(
                    &self.ctx,
                    package_config,
                    data.config_trigger,
                    project.clone(),
                    &data.commit_sha,
                    data.pr_id,
                );
                koji.report_status_to_all(CommitState::Error, NOT_ALLOWED_MSG, "")
                    .await;
            }
            Event::PrComment { .. } | Event::IssueComment { .. } => {
                self.ctx
                    .reporter(project.clone(), &data.commit_sha, data.pr_id)
                    .comment(&not_allowed_comment(user, &data.namespace))
                    .await;
            }
            _ => {}
        }
        Ok(Some(TaskResult::failure(NOT_ALLOWED_MSG)))
    }

    async fn resolve_forge_event(&self, event: &Event) -> Result<Resolution> {
        let Some((trigger, project_row)) = self.ctx.resolver().resolve(event).await? else {
            return Ok(Resolution::Ignored);
        };
        let project = self.ctx.forges.project(&project_row.project_url)?;

        let commit_sha = match (event.commit_sha(), event.pr_id()) {
            (Some(sha), _) if !sha.is_empty() => sha.to_string(),
            (_, Some(pr_id)) => project.get_pr(pr_id).await?.head_commit,
            _ => String::new(),
        };
        let config_ref = if commit_sha.is_empty() {
            event.git_ref().unwrap_or_default().to_string()
        } else {
            commit_sha.clone()
        };
        if config_ref.is_empty() {
            warn!(trigger = %event.trigger_kind(), "Event has no commit or ref");
            return Ok(Resolution::Ignored);
        }

        let data = event_data(
            event,
            &trigger,
            &project_row,
            commit_sha,
            event.pr_id().or_else(|| trigger.pr_id()),
            event.user_login().map(str::to_string),
        )?;
        Ok(Resolution::Found(data, project, config_ref))
    }

    async fn resolve_callback(&self, event: &Event) -> Result<Resolution> {
        let correlator = self.ctx.correlator();
        let (trigger, project_row, commit_sha) = match event {
            Event::BuildStart(build) | Event::BuildEnd(build) => {
                let Some(resolved) = correlator
                    .resolve_build(&build.backend, &build.build_id, &build.target)
                    .await?
                else {
                    warn!(build_id = %build.build_id, target = %build.target, "Build not found");
                    return Ok(Resolution::Terminal(TaskResult::failure(BUILD_NOT_FOUND_MSG)));
                };
                (resolved.trigger, resolved.project, resolved.build.commit_sha)
            }
            Event::TestResult(result) => {
                let Some(resolved) = correlator.resolve_test_run(&result.pipeline_id).await?
                else {
                    warn!(pipeline_id = %result.pipeline_id, "Test run not found");
                    return Ok(Resolution::Terminal(TaskResult::failure(
                        TEST_RUN_NOT_FOUND_MSG,
                    )));
                };
                (
                    resolved.trigger,
                    resolved.project,
                    resolved.test_run.commit_sha,
                )
            }
            _ => return Err(anyhow!("{} is not a callback", event.trigger_kind())),
        };

        let project = self.ctx.forges.project(&project_row.project_url)?;
        let config_ref = commit_sha.clone();
        let data = event_data(event, &trigger, &project_row, commit_sha, trigger.pr_id(), None)?;
        Ok(Resolution::Found(data, project, config_ref))
    }
}

enum Resolution {
    Found(EventData, Arc<dyn ForgeProject>, String),
    Terminal(TaskResult),
    Ignored,
}

fn event_data(
    event: &Event,
    trigger: &job_trigger::Model,
    project: &git_project::Model,
    commit_sha: String,
    pr_id: Option<u64>,
    user_login: Option<String>,
) -> Result<EventData> {
    let entity = trigger
        .trigger_kind()
        .ok_or_else(|| anyhow!("trigger {} has unknown kind {}", trigger.id, trigger.kind))?;
    let git_ref = match entity {
        TriggerEntityKind::BranchPush | TriggerEntityKind::Release => {
            Some(trigger.identifier.clone())
        }
        TriggerEntityKind::PullRequest | TriggerEntityKind::Issue => None,
    };
    Ok(EventData {
        event: event.clone(),
        trigger: event.trigger_kind(),
        forge: project.forge.parse::<ForgeKind>()?,
        project_url: project.project_url.clone(),
        namespace: project.namespace.clone(),
        repo: project.repo_name.clone(),
        commit_sha,
        pr_id,
        git_ref,
        user_login,
        trigger_id: trigger.id,
        trigger_entity: entity,
        identifier: trigger.identifier.clone(),
        config_trigger: entity.job_config_trigger(),
    })
}
