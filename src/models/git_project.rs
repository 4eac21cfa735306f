//! GitProject entity model
//!
//! One row per forge repository referenced by an event.

use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "git_projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Forge flavour serving the project (`github`, `gitlab`, `pagure`)
    pub forge: String,

    pub namespace: String,

    pub repo_name: String,

    /// Canonical HTML URL of the project; unique
    #[sea_orm(unique)]
    pub project_url: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job_trigger::Entity")]
    JobTrigger,
}

impl Related<super::job_trigger::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JobTrigger.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
