//! Build entity model
//!
//! Tracks a single (build id, target) pair submitted to a build backend.
//! Status moves forward only: pending, running, then a terminal state.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "builds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning trigger entity
    pub trigger_id: Uuid,

    /// Build backend that issued `build_id` (e.g. `copr`)
    pub backend: String,

    /// External build identifier as reported by the backend
    pub build_id: String,

    /// Build target / chroot, e.g. `fedora-rawhide-x86_64`
    pub target: String,

    /// Backend namespace that owns the build project
    pub owner: String,

    /// Backend project the build was submitted into
    pub project_name: String,

    /// Current status, see [`BuildStatus`]
    pub status: String,

    pub commit_sha: String,

    /// Backend web page for the build
    pub web_url: Option<String>,

    /// Live or final build log
    pub build_logs_url: Option<String>,

    pub start_time: Option<DateTimeWithTimeZone>,

    pub end_time: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn build_status(&self) -> Option<BuildStatus> {
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

/// Lifecycle of a build record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failure,
    Error,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Success | Self::Failure | Self::Error => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// True when moving from `self` to `next` goes strictly forward.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown build status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_move_forward() {
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Running));
        assert!(BuildStatus::Pending.can_transition_to(BuildStatus::Success));
        assert!(BuildStatus::Running.can_transition_to(BuildStatus::Failure));
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Pending));
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Running));
        assert!(!BuildStatus::Success.can_transition_to(BuildStatus::Failure));
        assert!(!BuildStatus::Running.can_transition_to(BuildStatus::Running));
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            BuildStatus::Pending,
            BuildStatus::Running,
            BuildStatus::Success,
            BuildStatus::Failure,
            BuildStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<BuildStatus>(), Ok(status));
        }
        assert!("queued".parse::<BuildStatus>().is_err());
    }
}
