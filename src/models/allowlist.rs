//! Allowlist entity model
//!
//! One row per forge account (user or organization) that installed the app
//! or was approved by a maintainer.

use std::fmt;
use std::str::FromStr;

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "allowlist")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub account_name: String,

    pub account_type: Option<String>,

    /// Current status, see [`AllowlistStatus`]
    pub status: String,

    pub installation_id: Option<i64>,

    pub sender_login: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn allowlist_status(&self) -> Option<AllowlistStatus> {
        self.status.parse().ok()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowlistStatus {
    Waiting,
    ApprovedAutomatically,
    ApprovedManually,
}

impl AllowlistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::ApprovedAutomatically => "approved_automatically",
            Self::ApprovedManually => "approved_manually",
        }
    }

    pub fn is_approved(&self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

impl fmt::Display for AllowlistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AllowlistStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "waiting" => Ok(Self::Waiting),
            "approved_automatically" => Ok(Self::ApprovedAutomatically),
            "approved_manually" => Ok(Self::ApprovedManually),
            other => Err(format!("unknown allowlist status '{other}'")),
        }
    }
}
