//! GitHub REST client
//!
//! Commit statuses and issue comments; GitHub has no PR flags.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    Comment, CommentCapable, CommentTarget, CommitState, CommitStatusCapable, ForgeError,
    ForgeKind, ForgeProject, IssueCapable, ProjectLocation, PullRequestInfo, check_response, next_page_link,
};

const ACCEPT_JSON: &str = "application/vnd.github.v3+json";
const ACCEPT_RAW: &str = "application/vnd.github.raw";

/// Thin authenticated wrapper around the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(http: reqwest::Client, api_base: String, token: Option<String>) -> Self {
        Self {
            http,
            api_base,
            token,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Accept", ACCEPT_JSON);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubPullHead {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitHubPull {
    number: u64,
    head: GitHubPullHead,
    user: GitHubUser,
}

#[derive(Debug, Deserialize)]
struct GitHubPermission {
    permission: String,
}

#[derive(Debug, Deserialize)]
struct GitHubComment {
    user: GitHubUser,
    body: String,
}

pub struct GitHubProject {
    client: GitHubClient,
    project_url: String,
    location: ProjectLocation,
}

impl GitHubProject {
    pub fn new(client: GitHubClient, project_url: &str, location: ProjectLocation) -> Self {
        Self {
            client,
            project_url: project_url.to_string(),
            location,
        }
    }

    fn repo_api(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.client.api_base, self.location.namespace, self.location.repo
        )
    }

    /// GitHub has no `running` state.
    fn github_state(state: CommitState) -> &'static str {
        match state {
            CommitState::Pending | CommitState::Running => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }
}

#[async_trait]
impl ForgeProject for GitHubProject {
    fn forge(&self) -> ForgeKind {
        ForgeKind::Github
    }

    fn namespace(&self) -> &str {
        &self.location.namespace
    }

    fn repo(&self) -> &str {
        &self.location.repo
    }

    fn project_url(&self) -> &str {
        &self.project_url
    }

    async fn get_pr(&self, pr_id: u64) -> Result<PullRequestInfo, ForgeError> {
        let url = format!("{}/pulls/{}", self.repo_api(), pr_id);
        let response = self.client.request(reqwest::Method::GET, &url).send().await?;
        let pull: GitHubPull = check_response("github", response).await?.json().await?;
        Ok(PullRequestInfo {
            id: pull.number,
            head_commit: pull.head.sha,
            author: pull.user.login,
        })
    }

    async fn get_file_content(&self, path: &str, git_ref: &str) -> Result<String, ForgeError> {
        let mut url = url::Url::parse(&format!("{}/contents/{}", self.repo_api(), path))?;
        url.query_pairs_mut().append_pair("ref", git_ref);
        let response = self
            .client
            .request(reqwest::Method::GET, url.as_str())
            .header("Accept", ACCEPT_RAW)
            .send()
            .await?;
        Ok(check_response("github", response).await?.text().await?)
    }

    async fn can_merge_pr(&self, login: &str) -> Result<bool, ForgeError> {
        let url = format!("{}/collaborators/{}/permission", self.repo_api(), login);
        let response = self.client.request(reqwest::Method::GET, &url).send().await?;
        let permission = match check_response("github", response).await {
            Ok(response) => response.json::<GitHubPermission>().await?,
            Err(ForgeError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };
        Ok(matches!(
            permission.permission.as_str(),
            "admin" | "maintain" | "write"
        ))
    }

    fn commit_statuses(&self) -> Option<&dyn CommitStatusCapable> {
        Some(self)
    }

    fn comments(&self) -> Option<&dyn CommentCapable> {
        Some(self)
    }

    fn issues(&self) -> Option<&dyn IssueCapable> {
        Some(self)
    }
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    number: u64,
}

#[async_trait]
impl IssueCapable for GitHubProject {
    async fn create_issue(&self, title: &str, body: &str) -> Result<u64, ForgeError> {
        let endpoint = format!("{}/issues", self.repo_api());
        let response = self
            .client
            .request(reqwest::Method::POST, &endpoint)
            .json(&json!({ "title": title, "body": body }))
            .send()
            .await?;
        let issue: GitHubIssue = check_response("github", response).await?.json().await?;
        debug!(issue = issue.number, "GitHub issue created");
        Ok(issue.number)
    }
}

#[async_trait]
impl CommitStatusCapable for GitHubProject {
    async fn set_commit_status(
        &self,
        commit_sha: &str,
        state: CommitState,
        url: &str,
        description: &str,
        check_name: &str,
    ) -> Result<(), ForgeError> {
        let endpoint = format!("{}/statuses/{}", self.repo_api(), commit_sha);
        let mut body = json!({
            "state": Self::github_state(state),
            "description": description,
            "context": check_name,
        });
        if !url.is_empty() {
            body["target_url"] = json!(url);
        }
        let response = self
            .client
            .request(reqwest::Method::POST, &endpoint)
            .json(&body)
            .send()
            .await?;
        check_response("github", response).await?;
        debug!(commit_sha, check_name, state = %state, "GitHub commit status set");
        Ok(())
    }
}

#[async_trait]
impl CommentCapable for GitHubProject {
    async fn post_comment(&self, target: &CommentTarget, body: &str) -> Result<(), ForgeError> {
        let endpoint = match target {
            CommentTarget::PullRequest(id) | CommentTarget::Issue(id) => {
                format!("{}/issues/{}/comments", self.repo_api(), id)
            }
            CommentTarget::Commit(sha) => format!("{}/commits/{}/comments", self.repo_api(), sha),
        };
        let response = self
            .client
            .request(reqwest::Method::POST, &endpoint)
            .json(&json!({ "body": body }))
            .send()
            .await?;
        check_response("github", response).await?;
        Ok(())
    }

    async fn list_comments(&self, pr_id: u64) -> Result<Vec<Comment>, ForgeError> {
        let mut next = Some(format!(
            "{}/issues/{}/comments?per_page=100",
            self.repo_api(),
            pr_id
        ));
        let mut comments = Vec::new();
        while let Some(url) = next.take() {
            let response = self.client.request(reqwest::Method::GET, &url).send().await?;
            let response = check_response("github", response).await?;
            next = next_page_link(response.headers());
            let page: Vec<GitHubComment> = response.json().await?;
            comments.extend(page.into_iter().map(|c| Comment {
                author: c.user.login,
                body: c.body,
            }));
        }
        Ok(comments)
    }
}
