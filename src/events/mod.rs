//! Inbound events.
//!
//! Forge webhooks and backend callbacks are normalized into [`Event`], which
//! is immutable once built and crosses the task queue as JSON.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backends::KOJI_BACKEND;
use crate::forge::ForgeKind;
use crate::models::build::BuildStatus;
use crate::models::job_trigger::TriggerEntityKind;
use crate::models::test_run::TestRunStatus;
use crate::package_config::JobConfigTrigger;

pub mod parser;

pub use parser::{
    parse_comment_command, parse_fedmsg, parse_github, parse_gitlab, parse_testing_farm_results,
};

/// What kind of occurrence an event is; drives handler selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PullRequest,
    Push,
    Release,
    IssueComment,
    PrComment,
    PrLabel,
    BuildStart,
    BuildEnd,
    TestResult,
    Installation,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Push => "push",
            TriggerKind::Release => "release",
            TriggerKind::IssueComment => "issue_comment",
            TriggerKind::PrComment => "pr_comment",
            TriggerKind::PrLabel => "pr_label",
            TriggerKind::BuildStart => "build_start",
            TriggerKind::BuildEnd => "build_end",
            TriggerKind::TestResult => "test_result",
            TriggerKind::Installation => "installation",
        }
    }

    /// Callbacks from build/test backends rather than forge activity.
    pub fn is_callback(&self) -> bool {
        matches!(
            self,
            TriggerKind::BuildStart | TriggerKind::BuildEnd | TriggerKind::TestResult
        )
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub forge: ForgeKind,
    pub namespace: String,
    pub repo: String,
    pub project_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
}

/// `/packit <command>` recognised in comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommentCommand {
    Build,
    Test,
}

/// Build state change reported by Copr or Koji.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
    pub backend: String,
    pub build_id: String,
    /// Chroot or Koji target; empty when the callback does not name one
    pub target: String,
    /// Backend status code. Copr uses 1 succeeded, 5 skipped, 0 failed;
    /// Koji uses task states, 2 closed, 3 canceled, 5 failed.
    #[serde(default)]
    pub status: Option<i64>,
    pub owner: String,
    pub project_name: String,
    #[serde(default)]
    pub pkg: Option<String>,
    #[serde(default)]
    pub timestamp: Option<f64>,
    /// Koji `buildArch` child task holding the build log
    #[serde(default)]
    pub rpm_build_task_id: Option<u64>,
}

impl BuildEvent {
    /// Terminal status implied by an end callback.
    pub fn end_status(&self) -> BuildStatus {
        if self.backend == KOJI_BACKEND {
            return match self.status {
                Some(2) => BuildStatus::Success,
                Some(5) => BuildStatus::Failure,
                _ => BuildStatus::Error,
            };
        }
        match self.status {
            Some(1) | Some(5) => BuildStatus::Success,
            Some(0) => BuildStatus::Failure,
            _ => BuildStatus::Error,
        }
    }
}

/// A GitHub App was installed on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationEvent {
    pub installation_id: u64,
    pub account_login: String,
    /// `User` or `Organization`
    pub account_type: String,
    pub sender_login: String,
    #[serde(default)]
    pub repositories: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResult {
    Passed,
    Failed,
    Error,
    #[serde(other)]
    Unknown,
}

impl TestResult {
    pub fn test_run_status(&self) -> TestRunStatus {
        match self {
            TestResult::Passed => TestRunStatus::Passed,
            TestResult::Failed => TestRunStatus::Failed,
            TestResult::Error => TestRunStatus::Error,
            TestResult::Unknown => TestRunStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub result: TestResult,
    #[serde(default)]
    pub log_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResultEvent {
    pub pipeline_id: String,
    pub result: TestResult,
    #[serde(default)]
    pub log_url: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub project_url: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestCaseResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    PullRequest {
        project: ProjectRef,
        pr_id: u64,
        action: PullRequestAction,
        commit_sha: String,
        user_login: String,
    },
    Push {
        project: ProjectRef,
        /// Branch name without `refs/heads/`
        git_ref: String,
        commit_sha: String,
        #[serde(default)]
        user_login: Option<String>,
    },
    Release {
        project: ProjectRef,
        tag_name: String,
        #[serde(default)]
        commit_sha: Option<String>,
    },
    IssueComment {
        project: ProjectRef,
        issue_id: u64,
        comment: String,
        user_login: String,
    },
    PrComment {
        project: ProjectRef,
        pr_id: u64,
        comment: String,
        #[serde(default)]
        command: Option<CommentCommand>,
        user_login: String,
        #[serde(default)]
        commit_sha: Option<String>,
    },
    PrLabel {
        project: ProjectRef,
        pr_id: u64,
        labels: Vec<String>,
        #[serde(default)]
        commit_sha: Option<String>,
    },
    BuildStart(BuildEvent),
    BuildEnd(BuildEvent),
    TestResult(TestResultEvent),
    Installation(InstallationEvent),
}

impl Event {
    pub fn trigger_kind(&self) -> TriggerKind {
        match self {
            Event::PullRequest { .. } => TriggerKind::PullRequest,
            Event::Push { .. } => TriggerKind::Push,
            Event::Release { .. } => TriggerKind::Release,
            Event::IssueComment { .. } => TriggerKind::IssueComment,
            Event::PrComment { .. } => TriggerKind::PrComment,
            Event::PrLabel { .. } => TriggerKind::PrLabel,
            Event::BuildStart(_) => TriggerKind::BuildStart,
            Event::BuildEnd(_) => TriggerKind::BuildEnd,
            Event::TestResult(_) => TriggerKind::TestResult,
            Event::Installation(_) => TriggerKind::Installation,
        }
    }

    /// Forge project the event happened on; callbacks carry none.
    pub fn project(&self) -> Option<&ProjectRef> {
        match self {
            Event::PullRequest { project, .. }
            | Event::Push { project, .. }
            | Event::Release { project, .. }
            | Event::IssueComment { project, .. }
            | Event::PrComment { project, .. }
            | Event::PrLabel { project, .. } => Some(project),
            Event::BuildStart(_)
            | Event::BuildEnd(_)
            | Event::TestResult(_)
            | Event::Installation(_) => None,
        }
    }

    pub fn pr_id(&self) -> Option<u64> {
        match self {
            Event::PullRequest { pr_id, .. }
            | Event::PrComment { pr_id, .. }
            | Event::PrLabel { pr_id, .. } => Some(*pr_id),
            _ => None,
        }
    }

    pub fn commit_sha(&self) -> Option<&str> {
        match self {
            Event::PullRequest { commit_sha, .. } | Event::Push { commit_sha, .. } => {
                Some(commit_sha)
            }
            Event::Release { commit_sha, .. }
            | Event::PrComment { commit_sha, .. }
            | Event::PrLabel { commit_sha, .. } => commit_sha.as_deref(),
            Event::TestResult(result) => result.commit_sha.as_deref(),
            Event::IssueComment { .. }
            | Event::BuildStart(_)
            | Event::BuildEnd(_)
            | Event::Installation(_) => None,
        }
    }

    pub fn user_login(&self) -> Option<&str> {
        match self {
            Event::PullRequest { user_login, .. }
            | Event::IssueComment { user_login, .. }
            | Event::PrComment { user_login, .. } => Some(user_login),
            Event::Push { user_login, .. } => user_login.as_deref(),
            Event::Installation(installation) => Some(&installation.sender_login),
            _ => None,
        }
    }

    /// Ref to read the package configuration from when no commit is known.
    pub fn git_ref(&self) -> Option<&str> {
        match self {
            Event::Push { git_ref, .. } => Some(git_ref),
            Event::Release { tag_name, .. } => Some(tag_name),
            _ => None,
        }
    }

    /// Durable trigger identity: kind plus PR number, branch, tag or issue number.
    pub fn trigger_identity(&self) -> Option<(TriggerEntityKind, String)> {
        match self {
            Event::PullRequest { pr_id, .. }
            | Event::PrComment { pr_id, .. }
            | Event::PrLabel { pr_id, .. } => {
                Some((TriggerEntityKind::PullRequest, pr_id.to_string()))
            }
            Event::Push { git_ref, .. } if !git_ref.is_empty() => {
                Some((TriggerEntityKind::BranchPush, git_ref.clone()))
            }
            Event::Release { tag_name, .. } if !tag_name.is_empty() => {
                Some((TriggerEntityKind::Release, tag_name.clone()))
            }
            Event::IssueComment { issue_id, .. } => {
                Some((TriggerEntityKind::Issue, issue_id.to_string()))
            }
            _ => None,
        }
    }

    pub fn comment_command(&self) -> Option<CommentCommand> {
        match self {
            Event::PrComment { command, .. } => *command,
            _ => None,
        }
    }

    pub fn build_event(&self) -> Option<&BuildEvent> {
        match self {
            Event::BuildStart(build) | Event::BuildEnd(build) => Some(build),
            _ => None,
        }
    }

    pub fn test_result(&self) -> Option<&TestResultEvent> {
        match self {
            Event::TestResult(result) => Some(result),
            _ => None,
        }
    }
}

/// Everything a handler needs about the event once its trigger is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub event: Event,
    pub trigger: TriggerKind,
    pub forge: ForgeKind,
    pub project_url: String,
    pub namespace: String,
    pub repo: String,
    pub commit_sha: String,
    #[serde(default)]
    pub pr_id: Option<u64>,
    #[serde(default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub user_login: Option<String>,
    pub trigger_id: Uuid,
    pub trigger_entity: TriggerEntityKind,
    pub identifier: String,
    pub config_trigger: JobConfigTrigger,
}

impl EventData {
    /// Comment-triggered and PR-opening events are subject to the permission check.
    pub fn requires_permission_check(&self) -> bool {
        matches!(
            self.event,
            Event::PullRequest { .. } | Event::PrComment { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project() -> ProjectRef {
        ProjectRef {
            forge: ForgeKind::Github,
            namespace: "packit".into(),
            repo: "hello-world".into(),
            project_url: "https://github.com/packit/hello-world".into(),
        }
    }

    #[test]
    fn event_serializes_with_event_type_tag() {
        let event = Event::Push {
            project: project(),
            git_ref: "main".into(),
            commit_sha: "abc".into(),
            user_login: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "push");
        assert_eq!(serde_json::from_value::<Event>(value).unwrap(), event);
    }

    #[test]
    fn build_callback_parses_from_tagged_json() {
        let event: Event = serde_json::from_value(json!({
            "event_type": "build_end",
            "backend": "copr",
            "build_id": "123",
            "target": "fedora-rawhide-x86_64",
            "status": 1,
            "owner": "packit",
            "project_name": "packit-hello-world-7"
        }))
        .unwrap();
        assert_eq!(event.trigger_kind(), TriggerKind::BuildEnd);
        assert!(event.trigger_kind().is_callback());
        assert_eq!(event.build_event().unwrap().end_status(), BuildStatus::Success);
        assert!(event.trigger_identity().is_none());
    }

    #[test]
    fn copr_status_codes_map_to_build_status() {
        let mut build = BuildEvent {
            backend: "copr".into(),
            build_id: "1".into(),
            target: "fedora-33-x86_64".into(),
            status: Some(0),
            owner: "o".into(),
            project_name: "p".into(),
            pkg: None,
            timestamp: None,
            rpm_build_task_id: None,
        };
        assert_eq!(build.end_status(), BuildStatus::Failure);
        build.status = Some(5);
        assert_eq!(build.end_status(), BuildStatus::Success);
        build.status = Some(4);
        assert_eq!(build.end_status(), BuildStatus::Error);

        // Same codes mean task states for Koji.
        build.backend = "koji".into();
        build.status = Some(5);
        assert_eq!(build.end_status(), BuildStatus::Failure);
        build.status = Some(2);
        assert_eq!(build.end_status(), BuildStatus::Success);
        build.status = Some(3);
        assert_eq!(build.end_status(), BuildStatus::Error);
    }

    #[test]
    fn installations_have_no_project() {
        let event = Event::Installation(InstallationEvent {
            installation_id: 1173510,
            account_login: "packit".into(),
            account_type: "Organization".into(),
            sender_login: "lbarcziova".into(),
            repositories: vec!["packit/hello-world".into()],
        });
        assert_eq!(event.trigger_kind(), TriggerKind::Installation);
        assert!(!event.trigger_kind().is_callback());
        assert!(event.project().is_none());
        assert!(event.trigger_identity().is_none());
        assert_eq!(event.user_login(), Some("lbarcziova"));
    }

    #[test]
    fn trigger_identity_per_event_kind() {
        let pr = Event::PrComment {
            project: project(),
            pr_id: 12,
            comment: "/packit build".into(),
            command: Some(CommentCommand::Build),
            user_login: "someone".into(),
            commit_sha: None,
        };
        assert_eq!(
            pr.trigger_identity(),
            Some((TriggerEntityKind::PullRequest, "12".to_string()))
        );

        let release = Event::Release {
            project: project(),
            tag_name: "0.1.0".into(),
            commit_sha: None,
        };
        assert_eq!(
            release.trigger_identity(),
            Some((TriggerEntityKind::Release, "0.1.0".to_string()))
        );
        assert_eq!(release.git_ref(), Some("0.1.0"));
    }

    #[test]
    fn unknown_test_result_values_deserialize_as_unknown() {
        let result: TestResult = serde_json::from_value(json!("skipped")).unwrap();
        assert_eq!(result, TestResult::Unknown);
        assert_eq!(result.test_run_status(), TestRunStatus::Unknown);
    }
}
