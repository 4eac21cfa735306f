//! Pagure API client
//!
//! Pagure reports through flags: commit flags stand in for commit statuses
//! and PR flags are keyed by a caller-chosen uid of at most 32 characters.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    Comment, CommentCapable, CommentTarget, CommitState, CommitStatusCapable, ForgeError,
    ForgeKind, ForgeProject, PrFlagCapable, ProjectLocation, PullRequestInfo, check_response,
};

#[derive(Debug, Clone)]
pub struct PagureClient {
    http: reqwest::Client,
    instance_url: String,
    token: Option<String>,
}

impl PagureClient {
    pub fn new(http: reqwest::Client, instance_url: String, token: Option<String>) -> Self {
        Self {
            http,
            instance_url,
            token,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("token {}", token)),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PagureUser {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PagureComment {
    user: PagureUser,
    comment: String,
}

#[derive(Debug, Deserialize)]
struct PagurePullRequest {
    id: u64,
    commit_stop: String,
    user: PagureUser,
    #[serde(default)]
    comments: Vec<PagureComment>,
}

#[derive(Debug, Deserialize)]
struct PagureProjectInfo {
    #[serde(default)]
    access_users: HashMap<String, Vec<String>>,
}

pub struct PagureProject {
    client: PagureClient,
    project_url: String,
    location: ProjectLocation,
}

impl PagureProject {
    pub fn new(client: PagureClient, project_url: &str, location: ProjectLocation) -> Self {
        Self {
            client,
            project_url: project_url.to_string(),
            location,
        }
    }

    fn project_api(&self) -> String {
        format!(
            "{}/api/0/{}",
            self.client.instance_url,
            self.location.full_name()
        )
    }

    fn pagure_status(state: CommitState) -> &'static str {
        match state {
            CommitState::Pending | CommitState::Running => "pending",
            CommitState::Success => "success",
            CommitState::Failure => "failure",
            CommitState::Error => "error",
        }
    }

    async fn post_form(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<(), ForgeError> {
        let response = self
            .client
            .request(reqwest::Method::POST, endpoint)
            .form(form)
            .send()
            .await?;
        check_response("pagure", response).await?;
        Ok(())
    }

    async fn fetch_pr(&self, pr_id: u64) -> Result<PagurePullRequest, ForgeError> {
        let url = format!("{}/pull-request/{}", self.project_api(), pr_id);
        let response = self.client.request(reqwest::Method::GET, &url).send().await?;
        Ok(check_response("pagure", response).await?.json().await?)
    }
}

#[async_trait]
impl ForgeProject for PagureProject {
    fn forge(&self) -> ForgeKind {
        ForgeKind::Pagure
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
        let pr = self.fetch_pr(pr_id).await?;
        Ok(PullRequestInfo {
            id: pr.id,
            head_commit: pr.commit_stop,
            author: pr.user.name,
        })
    }

    async fn get_file_content(&self, path: &str, git_ref: &str) -> Result<String, ForgeError> {
        let url = format!(
            "{}/{}/raw/{}/f/{}",
            self.client.instance_url,
            self.location.full_name(),
            git_ref,
            path
        );
        let response = self.client.request(reqwest::Method::GET, &url).send().await?;
        Ok(check_response("pagure", response).await?.text().await?)
    }

    async fn can_merge_pr(&self, login: &str) -> Result<bool, ForgeError> {
        let response = self
            .client
            .request(reqwest::Method::GET, &self.project_api())
            .send()
            .await?;
        let info: PagureProjectInfo = check_response("pagure", response).await?.json().await?;
        Ok(["owner", "admin", "commit"].iter().any(|level| {
            info.access_users
                .get(*level)
                .is_some_and(|users| users.iter().any(|u| u == login))
        }))
    }

    fn commit_statuses(&self) -> Option<&dyn CommitStatusCapable> {
        Some(self)
    }

    fn pr_flags(&self) -> Option<&dyn PrFlagCapable> {
        Some(self)
    }

    fn comments(&self) -> Option<&dyn CommentCapable> {
        Some(self)
    }
}

#[async_trait]
impl CommitStatusCapable for PagureProject {
    fn description_limit(&self) -> usize {
        255
    }

    fn requires_url(&self) -> bool {
        true
    }

    async fn set_commit_status(
        &self,
        commit_sha: &str,
        state: CommitState,
        url: &str,
        description: &str,
        check_name: &str,
    ) -> Result<(), ForgeError> {
        let endpoint = format!("{}/c/{}/flag", self.project_api(), commit_sha);
        self.post_form(
            &endpoint,
            &[
                ("username", check_name),
                ("comment", description),
                ("url", url),
                ("status", Self::pagure_status(state)),
            ],
        )
        .await?;
        debug!(commit_sha, check_name, state = %state, "Pagure commit flag set");
        Ok(())
    }
}

#[async_trait]
impl PrFlagCapable for PagureProject {
    async fn set_pr_flag(
        &self,
        pr_id: u64,
        check_name: &str,
        description: &str,
        url: &str,
        state: CommitState,
        uid: &str,
    ) -> Result<(), ForgeError> {
        let endpoint = format!("{}/pull-request/{}/flag", self.project_api(), pr_id);
        self.post_form(
            &endpoint,
            &[
                ("username", check_name),
                ("comment", description),
                ("url", url),
                ("status", Self::pagure_status(state)),
                ("uid", uid),
            ],
        )
        .await
    }
}

#[async_trait]
impl CommentCapable for PagureProject {
    async fn post_comment(&self, target: &CommentTarget, body: &str) -> Result<(), ForgeError> {
        let endpoint = match target {
            CommentTarget::PullRequest(id) => {
                format!("{}/pull-request/{}/comment", self.project_api(), id)
            }
            CommentTarget::Issue(id) => format!("{}/issue/{}/comment", self.project_api(), id),
            CommentTarget::Commit(_) => {
                return Err(ForgeError::Unsupported {
                    forge: "pagure",
                    operation: "commit comment",
                });
            }
        };
        self.post_form(&endpoint, &[("comment", body)]).await
    }

    async fn list_comments(&self, pr_id: u64) -> Result<Vec<Comment>, ForgeError> {
        let pr = self.fetch_pr(pr_id).await?;
        Ok(pr
            .comments
            .into_iter()
            .map(|c| Comment {
                author: c.user.name,
                body: c.comment,
            })
            .collect())
    }
}
