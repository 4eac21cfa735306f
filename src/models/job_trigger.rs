//! JobTrigger entity model
//!
//! A trigger is the durable subject of automation: a pull request, a branch
//! push, a release or an issue. Build and test-run records hang off it.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::package_config::JobConfigTrigger;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "job_triggers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Trigger kind, see [`TriggerEntityKind`]
    pub kind: String,

    /// Owning project
    pub project_id: Uuid,

    /// PR/issue number, branch name or release tag depending on `kind`
    pub identifier: String,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Parsed trigger kind; unknown values are reported as `None`.
    pub fn trigger_kind(&self) -> Option<TriggerEntityKind> {
        self.kind.parse().ok()
    }

    /// Numeric PR id when this trigger is a pull request.
    pub fn pr_id(&self) -> Option<u64> {
        match self.trigger_kind() {
            Some(TriggerEntityKind::PullRequest) => self.identifier.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::git_project::Entity",
        from = "Column::ProjectId",
        to = "super::git_project::Column::Id"
    )]
    GitProject,
    #[sea_orm(has_many = "super::build::Entity")]
    Build,
    #[sea_orm(has_many = "super::test_run::Entity")]
    TestRun,
}

impl Related<super::git_project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GitProject.def()
    }
}

impl Related<super::build::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Build.def()
    }
}

impl Related<super::test_run::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TestRun.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Kind of durable trigger entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEntityKind {
    PullRequest,
    BranchPush,
    Release,
    Issue,
}

impl TriggerEntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequest => "pull_request",
            Self::BranchPush => "branch_push",
            Self::Release => "release",
            Self::Issue => "issue",
        }
    }

    /// Job-config trigger that jobs resumed from this entity match against.
    pub fn job_config_trigger(&self) -> JobConfigTrigger {
        match self {
            Self::PullRequest => JobConfigTrigger::PullRequest,
            Self::BranchPush => JobConfigTrigger::Commit,
            Self::Release | Self::Issue => JobConfigTrigger::Release,
        }
    }
}

impl fmt::Display for TriggerEntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEntityKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pull_request" => Ok(Self::PullRequest),
            "branch_push" => Ok(Self::BranchPush),
            "release" => Ok(Self::Release),
            "issue" => Ok(Self::Issue),
            other => Err(format!("unknown trigger kind '{other}'")),
        }
    }
}
