//! Forge access behind capability traits.
//!
//! Every forge can read pull requests and files. Reporting primitives differ:
//! GitHub and GitLab have commit statuses, Pagure has commit and PR flags,
//! and comments are available everywhere except Pagure commits. Callers ask a
//! project handle for a capability and fall back when it is missing.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::AppConfig;

pub mod github;
pub mod gitlab;
pub mod pagure;

pub use github::{GitHubClient, GitHubProject};
pub use gitlab::{GitLabClient, GitLabProject};
pub use pagure::{PagureClient, PagureProject};

pub(crate) const USER_AGENT: &str = concat!("forge-dispatch/", env!("CARGO_PKG_VERSION"));

/// Reported state of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Pending,
    Running,
    Success,
    Failure,
    Error,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitState::Pending => "pending",
            CommitState::Running => "running",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }

    /// Upper-case name used in status comments.
    pub fn upper(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgeKind {
    Github,
    Gitlab,
    Pagure,
}

impl ForgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForgeKind::Github => "github",
            ForgeKind::Gitlab => "gitlab",
            ForgeKind::Pagure => "pagure",
        }
    }
}

impl fmt::Display for ForgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForgeKind {
    type Err = ForgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "github" => Ok(ForgeKind::Github),
            "gitlab" => Ok(ForgeKind::Gitlab),
            "pagure" => Ok(ForgeKind::Pagure),
            other => Err(ForgeError::UnsupportedForge(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestInfo {
    pub id: u64,
    pub head_commit: String,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub author: String,
    pub body: String,
}

/// Where a comment is posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentTarget {
    PullRequest(u64),
    Issue(u64),
    Commit(String),
}

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("{forge} API request failed with status {status}: {message}")]
    Api {
        forge: &'static str,
        status: u16,
        message: String,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no forge is configured for host '{0}'")]
    UnsupportedForge(String),

    #[error("invalid project url '{0}'")]
    InvalidProjectUrl(String),

    #[error("operation not supported by {forge}: {operation}")]
    Unsupported {
        forge: &'static str,
        operation: &'static str,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),
}

/// A repository on some forge.
#[async_trait]
pub trait ForgeProject: Send + Sync {
    fn forge(&self) -> ForgeKind;
    fn namespace(&self) -> &str;
    fn repo(&self) -> &str;
    fn project_url(&self) -> &str;

    async fn get_pr(&self, pr_id: u64) -> Result<PullRequestInfo, ForgeError>;

    async fn get_file_content(&self, path: &str, git_ref: &str) -> Result<String, ForgeError>;

    /// Whether `login` has write (or higher) access to the repository.
    async fn can_merge_pr(&self, login: &str) -> Result<bool, ForgeError>;

    fn commit_statuses(&self) -> Option<&dyn CommitStatusCapable> {
        None
    }

    fn pr_flags(&self) -> Option<&dyn PrFlagCapable> {
        None
    }

    fn comments(&self) -> Option<&dyn CommentCapable> {
        None
    }

    fn issues(&self) -> Option<&dyn IssueCapable> {
        None
    }

    /// PR comments written by `author`, oldest first.
    async fn comments_by(&self, pr_id: u64, author: &str) -> Result<Vec<Comment>, ForgeError> {
        let Some(comments) = self.comments() else {
            return Ok(Vec::new());
        };
        let all = comments.list_comments(pr_id).await?;
        Ok(all.into_iter().filter(|c| c.author == author).collect())
    }
}

#[async_trait]
pub trait CommitStatusCapable: Send + Sync {
    /// Maximum description length the forge accepts.
    fn description_limit(&self) -> usize {
        140
    }

    /// Forge rejects statuses without a target URL.
    fn requires_url(&self) -> bool {
        false
    }

    async fn set_commit_status(
        &self,
        commit_sha: &str,
        state: CommitState,
        url: &str,
        description: &str,
        check_name: &str,
    ) -> Result<(), ForgeError>;
}

#[async_trait]
pub trait PrFlagCapable: Send + Sync {
    /// Sets or updates a PR flag; `uid` identifies the flag across updates.
    async fn set_pr_flag(
        &self,
        pr_id: u64,
        check_name: &str,
        description: &str,
        url: &str,
        state: CommitState,
        uid: &str,
    ) -> Result<(), ForgeError>;
}

#[async_trait]
pub trait CommentCapable: Send + Sync {
    async fn post_comment(&self, target: &CommentTarget, body: &str) -> Result<(), ForgeError>;

    /// All comments on a PR, oldest first.
    async fn list_comments(&self, pr_id: u64) -> Result<Vec<Comment>, ForgeError>;
}

#[async_trait]
pub trait IssueCapable: Send + Sync {
    /// Opens an issue and returns its number.
    async fn create_issue(&self, title: &str, body: &str) -> Result<u64, ForgeError>;
}

/// Resolves project URLs to project handles.
pub trait ForgeFactory: Send + Sync {
    fn project(&self, project_url: &str) -> Result<Arc<dyn ForgeProject>, ForgeError>;
}

/// Host, namespace and repository name parsed from a project URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLocation {
    pub scheme: String,
    pub host: String,
    pub namespace: String,
    pub repo: String,
}

impl ProjectLocation {
    pub fn parse(project_url: &str) -> Result<Self, ForgeError> {
        let url = Url::parse(project_url)
            .map_err(|_| ForgeError::InvalidProjectUrl(project_url.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ForgeError::InvalidProjectUrl(project_url.to_string()))?
            .to_ascii_lowercase();
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let Some((last, rest)) = segments.split_last() else {
            return Err(ForgeError::InvalidProjectUrl(project_url.to_string()));
        };
        let repo = last.trim_end_matches(".git").to_string();
        if repo.is_empty() {
            return Err(ForgeError::InvalidProjectUrl(project_url.to_string()));
        }
        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            namespace: rest.join("/"),
            repo,
        })
    }

    /// `namespace/repo`, or just `repo` for namespace-less projects.
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.repo.clone()
        } else {
            format!("{}/{}", self.namespace, self.repo)
        }
    }
}

/// Maps a non-success response to a [`ForgeError`]; passes successful ones through.
pub(crate) async fn check_response(
    forge: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ForgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    match status.as_u16() {
        401 | 403 => Err(ForgeError::PermissionDenied(format!("{forge}: {snippet}"))),
        404 => Err(ForgeError::NotFound(url)),
        code => Err(ForgeError::Api {
            forge,
            status: code,
            message: snippet,
        }),
    }
}

/// Extracts the `rel="next"` URL from a `Link` header.
pub(crate) fn next_page_link(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let link_header = headers.get("Link")?.to_str().ok()?;
    for link in link_header.split(',') {
        let parts: Vec<&str> = link.split(';').collect();
        if parts.len() >= 2 && parts[1..].iter().any(|p| p.trim() == "rel=\"next\"") {
            let url_part = parts[0].trim();
            if let Some(start) = url_part.find('<')
                && let Some(end) = url_part.find('>')
            {
                return Some(url_part[start + 1..end].to_string());
            }
        }
    }
    None
}

/// Production [`ForgeFactory`]: picks the forge by host and caches handles.
pub struct ForgeRegistry {
    http: reqwest::Client,
    github_api_base: String,
    github_token: Option<String>,
    gitlab_instances: Vec<String>,
    gitlab_token: Option<String>,
    pagure_instances: Vec<String>,
    pagure_token: Option<String>,
    cache: Mutex<LruCache<String, Arc<dyn ForgeProject>>>,
}

impl ForgeRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self, ForgeError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        let capacity = NonZeroUsize::new(config.project_cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            http,
            github_api_base: config.github_api_base.trim_end_matches('/').to_string(),
            github_token: config.github_token.clone(),
            gitlab_instances: config.gitlab_instances.clone(),
            gitlab_token: config.gitlab_token.clone(),
            pagure_instances: config.pagure_instances.clone(),
            pagure_token: config.pagure_token.clone(),
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    fn forge_for_host(&self, host: &str) -> Option<ForgeKind> {
        if host == "github.com" {
            Some(ForgeKind::Github)
        } else if self.gitlab_instances.iter().any(|h| h == host) {
            Some(ForgeKind::Gitlab)
        } else if self.pagure_instances.iter().any(|h| h == host) {
            Some(ForgeKind::Pagure)
        } else {
            None
        }
    }

    fn build(&self, project_url: &str) -> Result<Arc<dyn ForgeProject>, ForgeError> {
        let location = ProjectLocation::parse(project_url)?;
        let kind = self
            .forge_for_host(&location.host)
            .ok_or_else(|| ForgeError::UnsupportedForge(location.host.clone()))?;
        let project: Arc<dyn ForgeProject> = match kind {
            ForgeKind::Github => Arc::new(GitHubProject::new(
                GitHubClient::new(
                    self.http.clone(),
                    self.github_api_base.clone(),
                    self.github_token.clone(),
                ),
                project_url,
                location,
            )),
            ForgeKind::Gitlab => {
                let api_base = format!("{}://{}/api/v4", location.scheme, location.host);
                Arc::new(GitLabProject::new(
                    GitLabClient::new(self.http.clone(), api_base, self.gitlab_token.clone()),
                    project_url,
                    location,
                ))
            }
            ForgeKind::Pagure => {
                let instance = format!("{}://{}", location.scheme, location.host);
                Arc::new(PagureProject::new(
                    PagureClient::new(self.http.clone(), instance, self.pagure_token.clone()),
                    project_url,
                    location,
                ))
            }
        };
        Ok(project)
    }
}

impl ForgeFactory for ForgeRegistry {
    fn project(&self, project_url: &str) -> Result<Arc<dyn ForgeProject>, ForgeError> {
        let key = project_url.trim_end_matches('/').to_string();
        if let Ok(mut cache) = self.cache.lock()
            && let Some(project) = cache.get(&key)
        {
            return Ok(Arc::clone(project));
        }

        let project = self.build(&key)?;
        debug!(project_url = %key, forge = %project.forge(), "Created forge project handle");
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, Arc::clone(&project));
        }
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_gitlab_namespace() {
        let location = ProjectLocation::parse("https://gitlab.com/group/sub/repo.git").unwrap();
        assert_eq!(location.host, "gitlab.com");
        assert_eq!(location.namespace, "group/sub");
        assert_eq!(location.repo, "repo");
        assert_eq!(location.full_name(), "group/sub/repo");
    }

    #[test]
    fn parses_namespace_less_pagure_project() {
        let location = ProjectLocation::parse("https://pagure.io/ogr").unwrap();
        assert_eq!(location.namespace, "");
        assert_eq!(location.full_name(), "ogr");
    }

    #[test]
    fn rejects_url_without_path() {
        assert!(matches!(
            ProjectLocation::parse("https://github.com/"),
            Err(ForgeError::InvalidProjectUrl(_))
        ));
    }

    #[test]
    fn extracts_next_page_link() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Link",
            "<https://api.github.com/x?page=2>; rel=\"next\", <https://api.github.com/x?page=5>; rel=\"last\""
                .parse()
                .unwrap(),
        );
        assert_eq!(
            next_page_link(&headers).as_deref(),
            Some("https://api.github.com/x?page=2")
        );
    }

    #[test]
    fn registry_dispatches_by_host_and_caches() {
        let registry = ForgeRegistry::from_config(&AppConfig::default()).unwrap();

        let gh = registry.project("https://github.com/packit/ogr").unwrap();
        assert_eq!(gh.forge(), ForgeKind::Github);
        let again = registry.project("https://github.com/packit/ogr/").unwrap();
        assert!(Arc::ptr_eq(&gh, &again));

        let gl = registry.project("https://gitlab.com/packit/ogr").unwrap();
        assert_eq!(gl.forge(), ForgeKind::Gitlab);
        let pg = registry.project("https://src.fedoraproject.org/rpms/python-ogr").unwrap();
        assert_eq!(pg.forge(), ForgeKind::Pagure);
        assert!(pg.pr_flags().is_some());

        assert!(matches!(
            registry.project("https://example.org/a/b"),
            Err(ForgeError::UnsupportedForge(_))
        ));
    }
}
