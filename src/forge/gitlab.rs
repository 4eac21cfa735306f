//! GitLab v4 API client
//!
//! Commit statuses plus notes on merge requests, issues and commits.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{
    Comment, CommentCapable, CommentTarget, CommitState, CommitStatusCapable, ForgeError,
    ForgeKind, ForgeProject, ProjectLocation, PullRequestInfo, check_response, next_page_link,
};

/// Developer access and above may push.
const DEVELOPER_ACCESS: u32 = 30;

#[derive(Debug, Clone)]
pub struct GitLabClient {
    http: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitLabClient {
    pub fn new(http: reqwest::Client, api_base: String, token: Option<String>) -> Self {
        Self {
            http,
            api_base,
            token,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.header("PRIVATE-TOKEN", token),
            None => builder,
        }
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GitLabMergeRequest {
    iid: u64,
    sha: String,
    author: GitLabUser,
}

#[derive(Debug, Deserialize)]
struct GitLabMember {
    username: String,
    access_level: u32,
}

#[derive(Debug, Deserialize)]
struct GitLabNote {
    author: GitLabUser,
    body: String,
}

pub struct GitLabProject {
    client: GitLabClient,
    project_url: String,
    location: ProjectLocation,
}

impl GitLabProject {
    pub fn new(client: GitLabClient, project_url: &str, location: ProjectLocation) -> Self {
        Self {
            client,
            project_url: project_url.to_string(),
            location,
        }
    }

    fn project_api(&self) -> String {
        format!(
            "{}/projects/{}",
            self.client.api_base,
            encode(&self.location.full_name())
        )
    }

    fn gitlab_state(state: CommitState) -> &'static str {
        match state {
            CommitState::Pending => "pending",
            CommitState::Running => "running",
            CommitState::Success => "success",
            CommitState::Failure | CommitState::Error => "failed",
        }
    }
}

#[async_trait]
impl ForgeProject for GitLabProject {
    fn forge(&self) -> ForgeKind {
        ForgeKind::Gitlab
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
        let url = format!("{}/merge_requests/{}", self.project_api(), pr_id);
        let response = self.client.request(reqwest::Method::GET, &url).send().await?;
        let mr: GitLabMergeRequest = check_response("gitlab", response).await?.json().await?;
        Ok(PullRequestInfo {
            id: mr.iid,
            head_commit: mr.sha,
            author: mr.author.username,
        })
    }

    async fn get_file_content(&self, path: &str, git_ref: &str) -> Result<String, ForgeError> {
        let mut url = url::Url::parse(&format!(
            "{}/repository/files/{}/raw",
            self.project_api(),
            encode(path)
        ))?;
        url.query_pairs_mut().append_pair("ref", git_ref);
        let response = self
            .client
            .request(reqwest::Method::GET, url.as_str())
            .send()
            .await?;
        Ok(check_response("gitlab", response).await?.text().await?)
    }

    async fn can_merge_pr(&self, login: &str) -> Result<bool, ForgeError> {
        let mut url = url::Url::parse(&format!("{}/members/all", self.project_api()))?;
        url.query_pairs_mut().append_pair("query", login);
        let response = self
            .client
            .request(reqwest::Method::GET, url.as_str())
            .send()
            .await?;
        let members: Vec<GitLabMember> = check_response("gitlab", response).await?.json().await?;
        Ok(members
            .iter()
            .any(|m| m.username == login && m.access_level >= DEVELOPER_ACCESS))
    }

    fn commit_statuses(&self) -> Option<&dyn CommitStatusCapable> {
        Some(self)
    }

    fn comments(&self) -> Option<&dyn CommentCapable> {
        Some(self)
    }
}

#[async_trait]
impl CommitStatusCapable for GitLabProject {
    fn description_limit(&self) -> usize {
        255
    }

    async fn set_commit_status(
        &self,
        commit_sha: &str,
        state: CommitState,
        url: &str,
        description: &str,
        check_name: &str,
    ) -> Result<(), ForgeError> {
        let endpoint = format!("{}/statuses/{}", self.project_api(), commit_sha);
        let mut body = json!({
            "state": Self::gitlab_state(state),
            "name": check_name,
            "description": description,
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
        match check_response("gitlab", response).await {
            Ok(_) => {}
            // GitLab answers 400 when the same state is posted twice.
            Err(ForgeError::Api { status: 400, message, .. })
                if message.contains("Cannot transition status") =>
            {
                debug!(commit_sha, check_name, "GitLab status already in requested state");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }
}

#[async_trait]
impl CommentCapable for GitLabProject {
    async fn post_comment(&self, target: &CommentTarget, body: &str) -> Result<(), ForgeError> {
        let (endpoint, payload) = match target {
            CommentTarget::PullRequest(id) => (
                format!("{}/merge_requests/{}/notes", self.project_api(), id),
                json!({ "body": body }),
            ),
            CommentTarget::Issue(id) => (
                format!("{}/issues/{}/notes", self.project_api(), id),
                json!({ "body": body }),
            ),
            CommentTarget::Commit(sha) => (
                format!("{}/repository/commits/{}/comments", self.project_api(), sha),
                json!({ "note": body }),
            ),
        };
        let response = self
            .client
            .request(reqwest::Method::POST, &endpoint)
            .json(&payload)
            .send()
            .await?;
        check_response("gitlab", response).await?;
        Ok(())
    }

    async fn list_comments(&self, pr_id: u64) -> Result<Vec<Comment>, ForgeError> {
        let mut next = Some(format!(
            "{}/merge_requests/{}/notes?sort=asc&order_by=created_at&per_page=100",
            self.project_api(),
            pr_id
        ));
        let mut comments = Vec::new();
        while let Some(url) = next.take() {
            let response = self.client.request(reqwest::Method::GET, &url).send().await?;
            let response = check_response("gitlab", response).await?;
            next = next_page_link(response.headers());
            let page: Vec<GitLabNote> = response.json().await?;
            comments.extend(page.into_iter().map(|n| Comment {
                author: n.author.username,
                body: n.body,
            }));
        }
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn project(server: &MockServer) -> GitLabProject {
        let client = GitLabClient::new(
            reqwest::Client::new(),
            format!("{}/api/v4", server.uri()),
            Some("glpat".to_string()),
        );
        let url = "https://gitlab.com/packit/hello-world";
        GitLabProject::new(client, url, ProjectLocation::parse(url).unwrap())
    }

    #[tokio::test]
    async fn error_state_is_reported_as_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/packit%2Fhello-world/statuses/abc"))
            .and(header("private-token", "glpat"))
            .and(body_json(json!({
                "state": "failed",
                "name": "packit/testing-farm-fedora-rawhide-x86_64",
                "description": "Tests error",
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        project(&server)
            .set_commit_status(
                "abc",
                CommitState::Error,
                "",
                "Tests error",
                "packit/testing-farm-fedora-rawhide-x86_64",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn commit_comment_uses_note_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/projects/packit%2Fhello-world/repository/commits/abc/comments"))
            .and(body_json(json!({ "note": "hi" })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        project(&server)
            .post_comment(&CommentTarget::Commit("abc".to_string()), "hi")
            .await
            .unwrap();
    }
}
