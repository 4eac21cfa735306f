//! # Data Models
//!
//! SeaORM entities for the durable side of job dispatch plus the small
//! response types served by the intake API.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod allowlist;
pub mod build;
pub mod git_project;
pub mod job_trigger;
pub mod test_run;

pub use allowlist::Entity as Allowlist;
pub use build::Entity as Build;
pub use git_project::Entity as GitProject;
pub use job_trigger::Entity as JobTrigger;
pub use test_run::Entity as TestRun;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "forge-dispatch".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
