//! Database migrations for the dispatch service.
//!
//! Tables hold the durable side of job dispatch: forge projects, trigger
//! entities, the build/test-run records used to correlate callbacks, and
//! the accounts allowed to use the service.

pub use sea_orm_migration::prelude::*;

mod m2026_10_01_000100_create_git_projects;
mod m2026_10_01_000200_create_job_triggers;
mod m2026_10_01_000300_create_builds;
mod m2026_10_01_000400_create_test_runs;
mod m2026_10_01_000500_create_allowlist;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_10_01_000100_create_git_projects::Migration),
            Box::new(m2026_10_01_000200_create_job_triggers::Migration),
            Box::new(m2026_10_01_000300_create_builds::Migration),
            Box::new(m2026_10_01_000400_create_test_runs::Migration),
            Box::new(m2026_10_01_000500_create_allowlist::Migration),
        ]
    }
}
