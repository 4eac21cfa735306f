//! Job handlers and the machinery that selects and runs them.
//!
//! A handler is one unit of work for one (event, job config) pair: submit a
//! Copr or Koji build, react to its state change, submit or finish a Testing
//! Farm run. [`registry`] declares which handlers an event kind reaches,
//! [`matcher`] selects them for a package config and [`runtime`] runs them
//! with failure isolation.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::backends::BackendError;
use crate::context::ServiceContext;
use crate::correlator::CorrelationError;
use crate::events::EventData;
use crate::forge::ForgeError;
use crate::package_config::{JobConfig, PackageConfig};
use crate::telemetry::HandlerScope;

pub mod build_helper;
pub mod copr_build;
pub mod koji_build;
pub mod matcher;
pub mod registry;
pub mod runtime;
pub mod testing_farm;

pub use matcher::{MatchedJob, match_jobs};
pub use registry::{HandlerRegistration, HandlerRegistry};
pub use runtime::{HandlerRuntime, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    PullRequestCoprBuild,
    PushCoprBuild,
    ReleaseCoprBuild,
    PrCommentCoprBuild,
    PrCommentTestingFarm,
    CoprBuildStart,
    CoprBuildEnd,
    TestingFarm,
    TestingFarmResults,
    PullRequestKojiBuild,
    PushKojiBuild,
    ReleaseKojiBuild,
    KojiBuildReport,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 13] = [
        HandlerKind::PullRequestCoprBuild,
        HandlerKind::PushCoprBuild,
        HandlerKind::ReleaseCoprBuild,
        HandlerKind::PrCommentCoprBuild,
        HandlerKind::PrCommentTestingFarm,
        HandlerKind::CoprBuildStart,
        HandlerKind::CoprBuildEnd,
        HandlerKind::TestingFarm,
        HandlerKind::TestingFarmResults,
        HandlerKind::PullRequestKojiBuild,
        HandlerKind::PushKojiBuild,
        HandlerKind::ReleaseKojiBuild,
        HandlerKind::KojiBuildReport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerKind::PullRequestCoprBuild => "pull_request_copr_build",
            HandlerKind::PushCoprBuild => "push_copr_build",
            HandlerKind::ReleaseCoprBuild => "release_copr_build",
            HandlerKind::PrCommentCoprBuild => "pr_comment_copr_build",
            HandlerKind::PrCommentTestingFarm => "pr_comment_testing_farm",
            HandlerKind::CoprBuildStart => "copr_build_start",
            HandlerKind::CoprBuildEnd => "copr_build_end",
            HandlerKind::TestingFarm => "testing_farm",
            HandlerKind::TestingFarmResults => "testing_farm_results",
            HandlerKind::PullRequestKojiBuild => "pull_request_koji_build",
            HandlerKind::PushKojiBuild => "push_koji_build",
            HandlerKind::ReleaseKojiBuild => "release_koji_build",
            HandlerKind::KojiBuildReport => "koji_build_report",
        }
    }

    /// Stable task name used on the task queue.
    pub fn task_name(&self) -> &'static str {
        match self {
            HandlerKind::PullRequestCoprBuild => "task.run_pr_copr_build_handler",
            HandlerKind::PushCoprBuild => "task.run_push_copr_build_handler",
            HandlerKind::ReleaseCoprBuild => "task.run_release_copr_build_handler",
            HandlerKind::PrCommentCoprBuild => "task.run_pr_comment_copr_build_handler",
            HandlerKind::PrCommentTestingFarm => "task.run_pr_comment_testing_farm_handler",
            HandlerKind::CoprBuildStart => "task.run_copr_build_start_handler",
            HandlerKind::CoprBuildEnd => "task.run_copr_build_end_handler",
            HandlerKind::TestingFarm => "task.run_testing_farm_handler",
            HandlerKind::TestingFarmResults => "task.run_testing_farm_results_handler",
            HandlerKind::PullRequestKojiBuild => "task.run_pr_koji_build_handler",
            HandlerKind::PushKojiBuild => "task.run_push_koji_build_handler",
            HandlerKind::ReleaseKojiBuild => "task.run_release_koji_build_handler",
            HandlerKind::KojiBuildReport => "task.run_koji_build_report_handler",
        }
    }

    pub fn from_task_name(task_name: &str) -> Option<HandlerKind> {
        HandlerKind::ALL
            .into_iter()
            .find(|kind| kind.task_name() == task_name)
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    pub msg: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of one handler run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub details: TaskDetails,
}

impl TaskResult {
    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            success: true,
            details: TaskDetails {
                msg: msg.into(),
                extra: Map::new(),
            },
        }
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            details: TaskDetails {
                msg: msg.into(),
                extra: Map::new(),
            },
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.extra.insert(key.into(), value.into());
        self
    }

    pub fn msg(&self) -> &str {
        &self.details.msg
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("forge error: {0}")]
    Forge(#[from] ForgeError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("correlation error: {0}")]
    Correlation(#[from] CorrelationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What a handler is constructed from; serializable so it can be queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerInput {
    pub package_config: PackageConfig,
    pub job_config: JobConfig,
    pub data: EventData,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Tags for the per-run error-tracking scope.
    fn tag_info(&self) -> HandlerScope;

    /// Whether the job should run at all for this event.
    async fn pre_check(&self) -> bool {
        true
    }

    async fn run(&mut self) -> Result<TaskResult, HandlerError>;

    /// Releases resources held by the handler; runs even when `run` panicked.
    fn clean(&mut self) {}
}

fn scope_for(kind: HandlerKind, data: &EventData) -> HandlerScope {
    HandlerScope {
        handler: kind.as_str().to_string(),
        repository: Some(data.repo.clone()),
        namespace: Some(data.namespace.clone()),
        job_key: None,
    }
}

/// Builds the handler for `kind`.
pub fn create_handler(
    kind: HandlerKind,
    ctx: Arc<ServiceContext>,
    input: HandlerInput,
) -> Box<dyn JobHandler> {
    match kind {
        HandlerKind::PullRequestCoprBuild
        | HandlerKind::PushCoprBuild
        | HandlerKind::ReleaseCoprBuild
        | HandlerKind::PrCommentCoprBuild => {
            Box::new(copr_build::CoprBuildHandler::new(kind, ctx, input))
        }
        HandlerKind::CoprBuildStart | HandlerKind::CoprBuildEnd => {
            Box::new(copr_build::CoprBuildStatusHandler::new(kind, ctx, input))
        }
        HandlerKind::TestingFarm | HandlerKind::PrCommentTestingFarm => {
            Box::new(testing_farm::TestingFarmHandler::new(kind, ctx, input))
        }
        HandlerKind::TestingFarmResults => {
            Box::new(testing_farm::TestingFarmResultsHandler::new(ctx, input))
        }
        HandlerKind::PullRequestKojiBuild
        | HandlerKind::PushKojiBuild
        | HandlerKind::ReleaseKojiBuild => {
            Box::new(koji_build::KojiBuildHandler::new(kind, ctx, input))
        }
        HandlerKind::KojiBuildReport => Box::new(koji_build::KojiBuildReportHandler::new(ctx, input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_names_round_trip() {
        for kind in HandlerKind::ALL {
            assert_eq!(HandlerKind::from_task_name(kind.task_name()), Some(kind));
        }
        assert_eq!(
            HandlerKind::PullRequestCoprBuild.task_name(),
            "task.run_pr_copr_build_handler"
        );
        assert_eq!(
            HandlerKind::from_task_name("task.run_push_koji_build_handler"),
            Some(HandlerKind::PushKojiBuild)
        );
        assert!(HandlerKind::from_task_name("task.unknown").is_none());
    }

    #[test]
    fn task_result_serializes_flat_details() {
        let result = TaskResult::failure("No packit config in repo").with_detail("event", "push");
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"success": false, "details": {"msg": "No packit config in repo", "event": "push"}})
        );
    }
}
