//! Build and test backends.
//!
//! Copr builds RPMs and Koji runs production scratch builds; Testing Farm
//! runs tests against Copr builds. All are reached over HTTP and sit behind
//! traits so handlers can run against fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::build::BuildStatus;

pub mod copr;
pub mod koji;
pub mod testing_farm;

pub use copr::CoprClient;
pub use koji::KojiClient;
pub use testing_farm::HttpTestingFarmClient;

/// Backend names stored with build records and carried by build callbacks.
pub const COPR_BACKEND: &str = "copr";
pub const KOJI_BACKEND: &str = "koji";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend} API request failed with status {status}: {message}")]
    Api {
        backend: &'static str,
        status: u16,
        message: String,
    },

    #[error("{backend} call failed with fault {code}: {message}")]
    Fault {
        backend: &'static str,
        code: i64,
        message: String,
    },

    #[error("invalid {backend} request: {message}")]
    InvalidRequest {
        backend: &'static str,
        message: String,
    },

    #[error("{backend} credentials are not configured")]
    MissingCredentials { backend: &'static str },

    #[error("unexpected {backend} response: {message}")]
    InvalidResponse {
        backend: &'static str,
        message: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub owner: String,
    pub project: String,
    pub clone_url: String,
    pub committish: String,
    pub chroots: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSubmission {
    pub build_id: String,
    pub web_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_id: String,
    pub state: String,
    pub owner: String,
    pub project_name: String,
    pub pkg: Option<String>,
}

impl BuildInfo {
    /// Final status from the backend state name; unfinished and canceled states count as errors.
    pub fn end_status(&self) -> BuildStatus {
        match self.state.as_str() {
            "succeeded" | "skipped" | "forked" => BuildStatus::Success,
            "failed" => BuildStatus::Failure,
            _ => BuildStatus::Error,
        }
    }
}

#[async_trait]
pub trait BuildBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn submit_build(&self, request: &BuildRequest) -> Result<BuildSubmission, BackendError>;

    async fn get_build_info(&self, build_id: &str) -> Result<BuildInfo, BackendError>;

    fn web_url(&self, owner: &str, project: &str, build_id: &str) -> String;

    /// Live log location for one chroot of a build, when the package is known.
    fn build_logs_url(
        &self,
        owner: &str,
        project: &str,
        target: &str,
        build_id: &str,
        pkg: Option<&str>,
    ) -> Option<String>;
}

/// Outcome of a raw request to Testing Farm.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResponse {
    pub status_code: u16,
    pub ok: bool,
    pub json: Option<Value>,
    pub text: String,
}

#[async_trait]
pub trait TestingFarmClient: Send + Sync {
    /// Base URL requests are sent to.
    fn api_url(&self) -> &str;

    async fn submit_test_request(
        &self,
        url: &str,
        method: reqwest::Method,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<RequestResponse, BackendError>;
}
