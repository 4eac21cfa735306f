//! Test utilities for database and dispatch testing.
//!
//! In-memory SQLite with migrations applied, a fake forge that records every
//! status, comment and issue call, and fake Copr / Koji / Testing Farm
//! backends.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use forge_dispatch::backends::{
    BackendError, BuildBackend, BuildInfo, BuildRequest, BuildSubmission, RequestResponse,
    TestingFarmClient,
};
use forge_dispatch::config::AppConfig;
use forge_dispatch::context::ServiceContext;
use forge_dispatch::correlator::BuildCorrelator;
use forge_dispatch::forge::{
    Comment, CommentCapable, CommentTarget, CommitState, CommitStatusCapable, ForgeError,
    ForgeFactory, ForgeKind, ForgeProject, IssueCapable, PullRequestInfo,
};
use forge_dispatch::models::job_trigger::TriggerEntityKind;
use forge_dispatch::models::{build, git_project, job_trigger};
use forge_dispatch::repositories::build::NewBuild;
use forge_dispatch::repositories::{ProjectRepository, TriggerRepository};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use serde_json::{Value, json};

pub const PROJECT_URL: &str = "https://github.com/packit/hello-world";
pub const SERVICE_ACCOUNT: &str = "packit-as-a-service[bot]";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Sets up the test database wrapped in an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Configuration used by dispatch tests: staging checks, test profile.
pub fn test_config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        service_account: SERVICE_ACCOUNT.to_string(),
        testing_farm_secret: Some("tf-secret".to_string()),
        command_handler_work_dir: std::env::temp_dir().join("forge-dispatch-tests"),
        ..AppConfig::default()
    }
}

/// One observable call made against the fake forge.
#[derive(Debug, Clone, PartialEq)]
pub enum ForgeCall {
    Status {
        commit_sha: String,
        check: String,
        state: CommitState,
        description: String,
        url: String,
    },
    Comment {
        target: CommentTarget,
        body: String,
    },
    Issue {
        title: String,
        body: String,
    },
}

/// A GitHub-like project: commit statuses and comments, no PR flags.
pub struct FakeProject {
    url: String,
    namespace: String,
    repo: String,
    files: Mutex<HashMap<String, String>>,
    pull_requests: Mutex<HashMap<u64, PullRequestInfo>>,
    writers: Mutex<Vec<String>>,
    comments: Mutex<Vec<Comment>>,
    calls: Mutex<Vec<ForgeCall>>,
    api_calls: Mutex<usize>,
}

impl FakeProject {
    pub fn new(url: &str) -> Self {
        let trimmed = url.trim_end_matches('/');
        let mut parts = trimmed.rsplitn(3, '/');
        let repo = parts.next().unwrap_or_default().to_string();
        let namespace = parts.next().unwrap_or_default().to_string();
        Self {
            url: trimmed.to_string(),
            namespace,
            repo,
            files: Mutex::new(HashMap::new()),
            pull_requests: Mutex::new(HashMap::new()),
            writers: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            api_calls: Mutex::new(0),
        }
    }

    /// Serves `.packit.yaml` at every ref.
    pub fn with_package_config(self, yaml: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(".packit.yaml".to_string(), yaml.to_string());
        self
    }

    pub fn with_pull_request(self, id: u64, head_commit: &str, author: &str) -> Self {
        self.pull_requests.lock().unwrap().insert(
            id,
            PullRequestInfo {
                id,
                head_commit: head_commit.to_string(),
                author: author.to_string(),
            },
        );
        self
    }

    pub fn with_writer(self, login: &str) -> Self {
        self.writers.lock().unwrap().push(login.to_string());
        self
    }

    /// Seeds an existing PR comment.
    pub fn with_comment(self, author: &str, body: &str) -> Self {
        self.comments.lock().unwrap().push(Comment {
            author: author.to_string(),
            body: body.to_string(),
        });
        self
    }

    pub fn calls(&self) -> Vec<ForgeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<(String, CommitState, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ForgeCall::Status {
                    check,
                    state,
                    description,
                    ..
                } => Some((check, state, description)),
                _ => None,
            })
            .collect()
    }

    pub fn posted_comments(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ForgeCall::Comment { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }

    /// Titles of the issues opened on the project.
    pub fn created_issues(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ForgeCall::Issue { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    /// Number of read calls (files, PRs, permissions, comment listings).
    pub fn api_calls(&self) -> usize {
        *self.api_calls.lock().unwrap()
    }

    fn touch(&self) {
        *self.api_calls.lock().unwrap() += 1;
    }
}

#[async_trait]
impl ForgeProject for FakeProject {
    fn forge(&self) -> ForgeKind {
        ForgeKind::Github
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn repo(&self) -> &str {
        &self.repo
    }

    fn project_url(&self) -> &str {
        &self.url
    }

    async fn get_pr(&self, pr_id: u64) -> Result<PullRequestInfo, ForgeError> {
        self.touch();
        self.pull_requests
            .lock()
            .unwrap()
            .get(&pr_id)
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(format!("pull request {pr_id}")))
    }

    async fn get_file_content(&self, path: &str, _git_ref: &str) -> Result<String, ForgeError> {
        self.touch();
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| ForgeError::NotFound(path.to_string()))
    }

    async fn can_merge_pr(&self, login: &str) -> Result<bool, ForgeError> {
        self.touch();
        Ok(self.writers.lock().unwrap().iter().any(|w| w == login))
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

#[async_trait]
impl IssueCapable for FakeProject {
    async fn create_issue(&self, title: &str, body: &str) -> Result<u64, ForgeError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(ForgeCall::Issue {
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(calls.len() as u64)
    }
}

#[async_trait]
impl CommitStatusCapable for FakeProject {
    async fn set_commit_status(
        &self,
        commit_sha: &str,
        state: CommitState,
        url: &str,
        description: &str,
        check_name: &str,
    ) -> Result<(), ForgeError> {
        self.calls.lock().unwrap().push(ForgeCall::Status {
            commit_sha: commit_sha.to_string(),
            check: check_name.to_string(),
            state,
            description: description.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl CommentCapable for FakeProject {
    async fn post_comment(&self, target: &CommentTarget, body: &str) -> Result<(), ForgeError> {
        self.calls.lock().unwrap().push(ForgeCall::Comment {
            target: target.clone(),
            body: body.to_string(),
        });
        self.comments.lock().unwrap().push(Comment {
            author: SERVICE_ACCOUNT.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn list_comments(&self, _pr_id: u64) -> Result<Vec<Comment>, ForgeError> {
        self.touch();
        Ok(self.comments.lock().unwrap().clone())
    }
}

/// Hands out the same [`FakeProject`] for its URL and refuses every other one.
pub struct FakeForge {
    project: Arc<FakeProject>,
    lookups: Mutex<usize>,
}

impl FakeForge {
    pub fn new(project: FakeProject) -> Self {
        Self {
            project: Arc::new(project),
            lookups: Mutex::new(0),
        }
    }

    pub fn fake_project(&self) -> Arc<FakeProject> {
        self.project.clone()
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

impl ForgeFactory for FakeForge {
    fn project(&self, project_url: &str) -> Result<Arc<dyn ForgeProject>, ForgeError> {
        *self.lookups.lock().unwrap() += 1;
        if project_url.trim_end_matches('/') == self.project.url {
            Ok(self.project.clone())
        } else {
            Err(ForgeError::UnsupportedForge(project_url.to_string()))
        }
    }
}

/// Copr (or Koji) stand-in; every submission gets the next build id.
pub struct FakeCopr {
    backend: &'static str,
    next_id: Mutex<u64>,
    submissions: Mutex<Vec<BuildRequest>>,
    fail_with: Option<String>,
    state: String,
}

impl FakeCopr {
    pub fn new(first_build_id: u64) -> Self {
        Self {
            backend: "copr",
            next_id: Mutex::new(first_build_id),
            submissions: Mutex::new(Vec::new()),
            fail_with: None,
            state: "succeeded".to_string(),
        }
    }

    /// Koji hub stand-in; task ids start at `first_task_id`.
    pub fn koji(first_task_id: u64) -> Self {
        Self {
            backend: "koji",
            ..Self::new(first_task_id)
        }
    }

    /// State reported when build info is fetched.
    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::new(0)
        }
    }

    pub fn submissions(&self) -> Vec<BuildRequest> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildBackend for FakeCopr {
    fn name(&self) -> &'static str {
        self.backend
    }

    async fn submit_build(&self, request: &BuildRequest) -> Result<BuildSubmission, BackendError> {
        self.submissions.lock().unwrap().push(request.clone());
        if let Some(message) = &self.fail_with {
            return Err(BackendError::Api {
                backend: self.backend,
                status: 500,
                message: message.clone(),
            });
        }
        let mut next = self.next_id.lock().unwrap();
        let build_id = next.to_string();
        *next += 1;
        Ok(BuildSubmission {
            web_url: self.web_url(&request.owner, &request.project, &build_id),
            build_id,
        })
    }

    async fn get_build_info(&self, build_id: &str) -> Result<BuildInfo, BackendError> {
        Ok(BuildInfo {
            build_id: build_id.to_string(),
            state: self.state.clone(),
            owner: "packit".to_string(),
            project_name: "hello".to_string(),
            pkg: Some("hello".to_string()),
        })
    }

    fn web_url(&self, owner: &str, project: &str, build_id: &str) -> String {
        match self.backend {
            "koji" => format!("https://koji.example/koji/taskinfo?taskID={build_id}"),
            _ => format!("https://copr.example/coprs/{owner}/{project}/build/{build_id}/"),
        }
    }

    fn build_logs_url(
        &self,
        _owner: &str,
        _project: &str,
        _target: &str,
        build_id: &str,
        _pkg: Option<&str>,
    ) -> Option<String> {
        match self.backend {
            "koji" => Some(format!("https://kojipkgs.example/tasks/{build_id}/build.log")),
            _ => None,
        }
    }
}

/// Testing Farm stand-in that accepts (or rejects) every request.
pub struct FakeTestingFarm {
    response: RequestResponse,
    requests: Mutex<Vec<(String, Value)>>,
}

impl FakeTestingFarm {
    pub fn accepting(run_url: &str) -> Self {
        let body = json!({"id": "request-1", "url": run_url});
        Self {
            response: RequestResponse {
                status_code: 200,
                ok: true,
                text: body.to_string(),
                json: Some(body),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(message: &str) -> Self {
        let body = json!({"message": message});
        Self {
            response: RequestResponse {
                status_code: 400,
                ok: false,
                text: body.to_string(),
                json: Some(body),
            },
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TestingFarmClient for FakeTestingFarm {
    fn api_url(&self) -> &str {
        "https://testing-farm.example/v0.1"
    }

    async fn submit_test_request(
        &self,
        url: &str,
        _method: reqwest::Method,
        _headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<RequestResponse, BackendError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body.clone()));
        Ok(self.response.clone())
    }
}

/// Everything a dispatch test needs, with handles on the fakes.
pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub ctx: Arc<ServiceContext>,
    pub forge: Arc<FakeForge>,
    pub copr: Arc<FakeCopr>,
    pub koji: Arc<FakeCopr>,
    pub testing_farm: Arc<FakeTestingFarm>,
}

impl Harness {
    pub async fn new(project: FakeProject) -> Result<Self> {
        Self::with_backends(
            project,
            FakeCopr::new(1000),
            FakeTestingFarm::accepting("https://artifacts.example/run-1"),
        )
        .await
    }

    pub async fn with_backends(
        project: FakeProject,
        copr: FakeCopr,
        testing_farm: FakeTestingFarm,
    ) -> Result<Self> {
        Self::assemble(project, copr, FakeCopr::koji(9000), testing_farm, test_config()).await
    }

    /// Default fakes with a caller-adjusted configuration.
    pub async fn with_config(project: FakeProject, config: AppConfig) -> Result<Self> {
        Self::assemble(
            project,
            FakeCopr::new(1000),
            FakeCopr::koji(9000),
            FakeTestingFarm::accepting("https://artifacts.example/run-1"),
            config,
        )
        .await
    }

    pub async fn with_koji(project: FakeProject, koji: FakeCopr) -> Result<Self> {
        Self::assemble(
            project,
            FakeCopr::new(1000),
            koji,
            FakeTestingFarm::accepting("https://artifacts.example/run-1"),
            test_config(),
        )
        .await
    }

    pub async fn assemble(
        project: FakeProject,
        copr: FakeCopr,
        koji: FakeCopr,
        testing_farm: FakeTestingFarm,
        config: AppConfig,
    ) -> Result<Self> {
        let db = setup_test_db_arc().await?;
        let forge = Arc::new(FakeForge::new(project));
        let copr = Arc::new(copr);
        let koji = Arc::new(koji);
        let testing_farm = Arc::new(testing_farm);
        let ctx = Arc::new(ServiceContext::new(
            Arc::new(config),
            db.clone(),
            forge.clone(),
            copr.clone(),
            koji.clone(),
            testing_farm.clone(),
        ));
        Ok(Self {
            db,
            ctx,
            forge,
            copr,
            koji,
            testing_farm,
        })
    }

    pub fn project(&self) -> Arc<FakeProject> {
        self.forge.fake_project()
    }

    /// Creates the project row and the PR trigger entity.
    pub async fn seed_pull_request(
        &self,
        pr_id: u64,
    ) -> Result<(git_project::Model, job_trigger::Model)> {
        let project = ProjectRepository::new(self.db.clone())
            .get_or_create("github", "packit", "hello-world", PROJECT_URL)
            .await?;
        let trigger = TriggerRepository::new(self.db.clone())
            .get_or_create(TriggerEntityKind::PullRequest, project.id, &pr_id.to_string())
            .await?;
        Ok((project, trigger))
    }

    /// Records a pending Copr build for the trigger.
    pub async fn seed_build(
        &self,
        trigger: &job_trigger::Model,
        build_id: &str,
        target: &str,
        commit_sha: &str,
    ) -> Result<build::Model> {
        let record = BuildCorrelator::new(self.db.clone())
            .record_submission(NewBuild {
                trigger_id: trigger.id,
                backend: "copr".to_string(),
                build_id: build_id.to_string(),
                target: target.to_string(),
                owner: "packit".to_string(),
                project_name: "packit-hello-world-7".to_string(),
                commit_sha: commit_sha.to_string(),
                web_url: Some(format!(
                    "https://copr.example/coprs/packit/packit-hello-world-7/build/{build_id}/"
                )),
            })
            .await?;
        Ok(record)
    }
}

pub const BUILD_AND_TESTS_CONFIG: &str = r#"
specfile_path: hello.spec
jobs:
  - job: copr_build
    trigger: pull_request
    metadata:
      targets: [fedora-rawhide]
  - job: tests
    trigger: pull_request
    metadata:
      targets: [fedora-rawhide]
"#;

pub const PRODUCTION_BUILD_CONFIG: &str = r#"
specfile_path: hello.spec
jobs:
  - job: production_build
    trigger: pull_request
    metadata:
      targets: [fedora-rawhide, fedora-34]
"#;

pub const BUILD_ONLY_CONFIG: &str = r#"
specfile_path: hello.spec
jobs:
  - job: copr_build
    trigger: pull_request
    metadata:
      targets: [fedora-rawhide-x86_64]
"#;
