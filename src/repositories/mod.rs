//! # Repository Layer
//!
//! Repository implementations that encapsulate SeaORM operations for the
//! dispatch tables. Lookups that back correlation keys are get-or-create
//! and rely on unique indexes rather than locks.

pub mod allowlist;
pub mod build;
pub mod project;
pub mod test_run;
pub mod trigger;

pub use allowlist::AllowlistRepository;
pub use build::BuildRepository;
pub use project::ProjectRepository;
pub use test_run::TestRunRepository;
pub use trigger::TriggerRepository;
