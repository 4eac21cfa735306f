//! Repository-level `.packit.yaml` configuration.
//!
//! Only the parts the dispatcher reads are modelled: the job list, per-job
//! targets/branch and the notification switches. Unknown keys are ignored so
//! newer configuration files still load.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::forge::{ForgeError, ForgeProject};

/// Candidate file names, checked in order.
pub const CONFIG_FILE_NAMES: &[&str] = &[".packit.yaml", ".packit.yml", "packit.yaml", "packit.yml"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Build,
    CoprBuild,
    Tests,
    ProductionBuild,
    ProposeDownstream,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Build => "build",
            JobType::CoprBuild => "copr_build",
            JobType::Tests => "tests",
            JobType::ProductionBuild => "production_build",
            JobType::ProposeDownstream => "propose_downstream",
        }
    }

    /// `build` and `copr_build` are aliases for the same Copr build job.
    pub fn is_copr_build(&self) -> bool {
        matches!(self, JobType::Build | JobType::CoprBuild)
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobConfigTrigger {
    PullRequest,
    Commit,
    Release,
}

impl fmt::Display for JobConfigTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            JobConfigTrigger::PullRequest => "pull_request",
            JobConfigTrigger::Commit => "commit",
            JobConfigTrigger::Release => "release",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub targets: BTreeSet<String>,
    /// Branch a `commit` job listens on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Copr owner override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Copr project override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestNotifications {
    #[serde(default = "default_true")]
    pub successful_build: bool,
}

impl Default for PullRequestNotifications {
    fn default() -> Self {
        Self {
            successful_build: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub pull_request: PullRequestNotifications,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(rename = "job")]
    pub job_type: JobType,
    pub trigger: JobConfigTrigger,
    #[serde(default)]
    pub metadata: JobMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,
}

impl JobConfig {
    pub fn new(job_type: JobType, trigger: JobConfigTrigger) -> Self {
        Self {
            job_type,
            trigger,
            metadata: JobMetadata::default(),
            notifications: None,
        }
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.metadata.branch = Some(branch.into());
        self
    }

    /// Branch for `commit` jobs; defaults to `master`.
    pub fn branch(&self) -> &str {
        self.metadata.branch.as_deref().unwrap_or("master")
    }

    pub fn notify_successful_build(&self) -> bool {
        self.notifications
            .map(|n| n.pull_request.successful_build)
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,
    /// Downstream package name; used for log URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream_package_name: Option<String>,
}

impl PackageConfig {
    /// Parses YAML text; jobs without their own notifications inherit the package-level ones.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        let mut config: PackageConfig = serde_yaml::from_str(text)?;
        if let Some(notifications) = config.notifications {
            for job in config.jobs.iter_mut() {
                if job.notifications.is_none() {
                    job.notifications = Some(notifications);
                }
            }
        }
        Ok(config)
    }

    /// Loads the configuration from the project at `git_ref`.
    ///
    /// Returns `Ok(None)` when no configuration file exists or it fails to
    /// parse; the latter is logged since the repository owner has to fix it.
    pub async fn fetch(
        project: &dyn ForgeProject,
        git_ref: &str,
    ) -> Result<Option<PackageConfig>, ForgeError> {
        for name in CONFIG_FILE_NAMES {
            match project.get_file_content(name, git_ref).await {
                Ok(text) => {
                    return match PackageConfig::from_yaml(&text) {
                        Ok(config) => Ok(Some(config)),
                        Err(err) => {
                            warn!(
                                project = %project.project_url(),
                                file = %name,
                                error = %err,
                                "Invalid package config"
                            );
                            Ok(None)
                        }
                    };
                }
                Err(ForgeError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        debug!(project = %project.project_url(), git_ref, "No package config found");
        Ok(None)
    }
}
