//! Copr API v3 client

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{BackendError, BuildBackend, BuildInfo, BuildRequest, BuildSubmission};

const RESULTS_BASE: &str = "https://copr-be.cloud.fedoraproject.org/results";

#[derive(Debug, Clone)]
pub struct CoprClient {
    http: reqwest::Client,
    api_base: String,
    login: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CoprBuild {
    id: u64,
    #[serde(default)]
    state: String,
    #[serde(default)]
    ownername: String,
    #[serde(default)]
    projectname: String,
    #[serde(default)]
    source_package: Option<CoprSourcePackage>,
}

#[derive(Debug, Deserialize)]
struct CoprSourcePackage {
    name: Option<String>,
}

impl CoprClient {
    pub fn new(
        http: reqwest::Client,
        api_base: String,
        login: Option<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            login,
            token,
        }
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, BackendError> {
        match (&self.login, &self.token) {
            (Some(login), Some(token)) => Ok(builder.basic_auth(login, Some(token))),
            _ => Err(BackendError::MissingCredentials { backend: "copr" }),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            backend: "copr",
            status: status.as_u16(),
            message: body.chars().take(200).collect(),
        })
    }

    /// Creates the project, tolerating one that already exists.
    async fn ensure_project(&self, request: &BuildRequest) -> Result<(), BackendError> {
        let url = format!("{}/api_3/project/add/{}", self.api_base, request.owner);
        let builder = self.http.post(&url).json(&json!({
            "projectname": request.project,
            "chroots": request.chroots,
            "description": "Continuous builds initiated by forge-dispatch.",
            "unlisted_on_hp": true,
        }));
        let response = self.authed(builder)?.send().await?;
        match Self::check(response).await {
            Ok(_) => {
                info!(owner = %request.owner, project = %request.project, "Copr project created");
                Ok(())
            }
            Err(BackendError::Api { status: 400, message, .. })
                if message.contains("already") =>
            {
                debug!(project = %request.project, "Copr project exists");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl BuildBackend for CoprClient {
    fn name(&self) -> &'static str {
        "copr"
    }

    async fn submit_build(&self, request: &BuildRequest) -> Result<BuildSubmission, BackendError> {
        self.ensure_project(request).await?;

        let url = format!("{}/api_3/build/create/scm", self.api_base);
        let builder = self.http.post(&url).json(&json!({
            "ownername": request.owner,
            "projectname": request.project,
            "clone_url": request.clone_url,
            "committish": request.committish,
            "chroots": request.chroots,
            "source_build_method": "make_srpm",
        }));
        let response = self.authed(builder)?.send().await?;
        let build: CoprBuild = Self::check(response).await?.json().await?;
        let build_id = build.id.to_string();
        info!(build_id = %build_id, project = %request.project, "Copr build submitted");
        Ok(BuildSubmission {
            web_url: self.web_url(&request.owner, &request.project, &build_id),
            build_id,
        })
    }

    async fn get_build_info(&self, build_id: &str) -> Result<BuildInfo, BackendError> {
        let url = format!("{}/api_3/build/{}", self.api_base, build_id);
        let response = self.http.get(&url).send().await?;
        let build: CoprBuild = Self::check(response).await?.json().await?;
        Ok(BuildInfo {
            build_id: build.id.to_string(),
            state: build.state,
            owner: build.ownername,
            project_name: build.projectname,
            pkg: build.source_package.and_then(|p| p.name),
        })
    }

    fn web_url(&self, owner: &str, project: &str, build_id: &str) -> String {
        format!(
            "{}/coprs/{}/{}/build/{}/",
            self.api_base, owner, project, build_id
        )
    }

    fn build_logs_url(
        &self,
        owner: &str,
        project: &str,
        target: &str,
        build_id: &str,
        pkg: Option<&str>,
    ) -> Option<String> {
        let pkg = pkg?;
        let id: u64 = build_id.parse().ok()?;
        Some(format!(
            "{}/{}/{}/{}/{:08}-{}/builder-live.log.gz",
            RESULTS_BASE, owner, project, target, id, pkg
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> BuildRequest {
        BuildRequest {
            owner: "packit".into(),
            project: "packit-hello-world-7".into(),
            clone_url: "https://github.com/packit/hello-world".into(),
            committish: "abc".into(),
            chroots: vec!["fedora-rawhide-x86_64".into()],
        }
    }

    #[tokio::test]
    async fn submits_build_into_existing_project() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api_3/project/add/packit"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("Project packit-hello-world-7 already exists"),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api_3/build/create/scm"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1044215})))
            .expect(1)
            .mount(&server)
            .await;

        let client = CoprClient::new(
            reqwest::Client::new(),
            server.uri(),
            Some("packit".into()),
            Some("token".into()),
        );
        let submission = client.submit_build(&request()).await.unwrap();
        assert_eq!(submission.build_id, "1044215");
        assert_eq!(
            submission.web_url,
            format!("{}/coprs/packit/packit-hello-world-7/build/1044215/", server.uri())
        );
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let client = CoprClient::new(reqwest::Client::new(), "http://127.0.0.1:9".into(), None, None);
        let err = client.submit_build(&request()).await.unwrap_err();
        assert!(matches!(err, BackendError::MissingCredentials { .. }));
    }

    #[tokio::test]
    async fn build_info_maps_state_to_end_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api_3/build/1044215"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1044215,
                "state": "failed",
                "ownername": "packit",
                "projectname": "packit-hello-world-7",
                "source_package": {"name": "hello"}
            })))
            .mount(&server)
            .await;

        let client = CoprClient::new(reqwest::Client::new(), server.uri(), None, None);
        let info = client.get_build_info("1044215").await.unwrap();

        assert_eq!(info.pkg.as_deref(), Some("hello"));
        assert_eq!(info.end_status(), crate::models::build::BuildStatus::Failure);
    }

    #[test]
    fn logs_url_zero_pads_build_id() {
        let client = CoprClient::new(reqwest::Client::new(), "https://copr".into(), None, None);
        assert_eq!(
            client
                .build_logs_url("packit", "p", "fedora-33-x86_64", "1234", Some("hello"))
                .as_deref(),
            Some(
                "https://copr-be.cloud.fedoraproject.org/results/packit/p/fedora-33-x86_64/00001234-hello/builder-live.log.gz"
            )
        );
        assert!(client.build_logs_url("packit", "p", "t", "1", None).is_none());
    }
}
