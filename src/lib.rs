//! # Forge Dispatch Library
//!
//! Turns forge webhooks and build/test backend callbacks into CI jobs, runs
//! the matching handlers and reports commit statuses back to GitHub, GitLab
//! and Pagure.

pub mod allowlist;
pub mod backends;
pub mod config;
pub mod context;
pub mod correlator;
pub mod db;
pub mod error;
pub mod events;
pub mod forge;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod orchestrator;
pub mod package_config;
pub mod reporting;
pub mod repositories;
pub mod resolver;
pub mod server;
pub mod telemetry;
pub mod webhook_verification;
pub mod worker;
pub use migration;
