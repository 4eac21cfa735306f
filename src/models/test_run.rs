//! TestRun entity model
//!
//! One Testing Farm pipeline submitted for a built target, keyed by the
//! pipeline id this service generated at submission time.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "test_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub trigger_id: Uuid,

    /// Opaque pipeline id; unique
    #[sea_orm(unique)]
    pub pipeline_id: String,

    pub target: String,

    pub commit_sha: String,

    /// Current status, see [`TestRunStatus`]
    pub status: String,

    pub web_url: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn test_status(&self) -> Option<TestRunStatus> {
        self.status.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job_trigger::Entity",
        from = "Column::TriggerId",
        to = "super::job_trigger::Column::Id"
    )]
    JobTrigger,
}

impl Related<super::job_trigger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JobTrigger.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle of a test run; mirrors the result values Testing Farm reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestRunStatus {
    New,
    Running,
    Passed,
    Failed,
    Error,
    Unknown,
}

impl TestRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::New => 0,
            Self::Running => 1,
            _ => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    pub fn can_transition_to(&self, next: TestRunStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for TestRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestRunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "new" => Ok(Self::New),
            "running" => Ok(Self::Running),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "error" => Ok(Self::Error),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown test run status '{other}'")),
        }
    }
}
