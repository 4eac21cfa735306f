//! # Tests for Handlers
//!
//! Unit tests for the intake handlers, driven directly with a recording queue.

use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Json,
};
use hmac::{Hmac, Mac};
use sea_orm::DatabaseConnection;
use serde_json::json;
use sha2::Sha256;

use crate::config::AppConfig;
use crate::events::TriggerKind;
use crate::handlers::webhooks::{
    WebhookAcceptResponse, fedmsg_webhook, github_webhook, gitlab_webhook, testing_farm_results,
};
use crate::handlers::{healthz, root};
use crate::server::AppState;
use crate::worker::{QueueError, QueuedTask, TaskQueue};

#[derive(Default)]
struct RecordingQueue {
    tasks: Mutex<Vec<QueuedTask>>,
    reject_with: Option<QueueError>,
}

impl RecordingQueue {
    fn rejecting(err: QueueError) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            reject_with: Some(err),
        }
    }

    fn triggers(&self) -> Vec<TriggerKind> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter_map(|task| match task {
                QueuedTask::ProcessEvent(event) => Some(event.trigger_kind()),
                QueuedTask::RunHandler(_) => None,
            })
            .collect()
    }
}

impl TaskQueue for RecordingQueue {
    fn submit(&self, task: QueuedTask) -> Result<(), QueueError> {
        if let Some(err) = &self.reject_with {
            return Err(match err {
                QueueError::Closed => QueueError::Closed,
                QueueError::Full => QueueError::Full,
            });
        }
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

fn config() -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        webhook_github_secret: Some("gh-secret".to_string()),
        webhook_gitlab_token: Some("gl-token".to_string()),
        testing_farm_secret: Some("tf-secret".to_string()),
        ..AppConfig::default()
    }
}

fn state_with(config: AppConfig, queue: Arc<RecordingQueue>) -> AppState {
    AppState {
        config: Arc::new(config),
        db: Arc::new(DatabaseConnection::default()),
        queue,
    }
}

fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn github_headers(event: &str, body: &[u8], secret: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("X-GitHub-Event", HeaderValue::from_str(event).unwrap());
    headers.insert(
        "X-Hub-Signature-256",
        HeaderValue::from_str(&sign(body, secret)).unwrap(),
    );
    headers
}

fn pull_request_body() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "action": "opened",
        "number": 7,
        "pull_request": {"head": {"sha": "abc123"}, "user": {"login": "contributor"}},
        "repository": {
            "full_name": "packit/hello-world",
            "html_url": "https://github.com/packit/hello-world"
        }
    }))
    .unwrap()
}

fn status_of(response: &(StatusCode, Json<WebhookAcceptResponse>)) -> (StatusCode, &str) {
    (response.0, response.1.0.status.as_str())
}

#[tokio::test]
async fn root_returns_service_info() {
    let Json(info) = root().await;

    assert_eq!(info.service, "forge-dispatch");
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn healthz_reports_unavailable_database() {
    let state = state_with(config(), Arc::new(RecordingQueue::default()));

    let err = healthz(State(state)).await.unwrap_err();

    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn healthz_ok_with_live_database() {
    let db = sea_orm::Database::connect("sqlite::memory:").await.unwrap();
    let state = AppState {
        db: Arc::new(db),
        ..state_with(config(), Arc::new(RecordingQueue::default()))
    };

    let Json(health) = healthz(State(state)).await.unwrap();

    assert_eq!(health.status, "ok");
}

#[tokio::test]
async fn github_signed_pull_request_is_queued() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue.clone());
    let body = pull_request_body();
    let headers = github_headers("pull_request", &body, "gh-secret");

    let response = github_webhook(State(state), headers, Bytes::from(body))
        .await
        .unwrap();

    assert_eq!(status_of(&response), (StatusCode::ACCEPTED, "accepted"));
    assert_eq!(queue.triggers(), vec![TriggerKind::PullRequest]);
}

#[tokio::test]
async fn github_bad_signature_is_rejected() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue.clone());
    let body = pull_request_body();
    let headers = github_headers("pull_request", &body, "wrong-secret");

    let err = github_webhook(State(state), headers, Bytes::from(body))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    assert!(queue.triggers().is_empty());
}

#[tokio::test]
async fn github_ping_answers_pong() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue.clone());
    let body = br#"{"zen":"Design for failure."}"#.to_vec();
    let headers = github_headers("ping", &body, "gh-secret");

    let response = github_webhook(State(state), headers, Bytes::from(body))
        .await
        .unwrap();

    assert_eq!(status_of(&response), (StatusCode::OK, "Pong!"));
    assert!(queue.triggers().is_empty());
}

#[tokio::test]
async fn github_unhandled_event_is_ignored() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue.clone());
    let body = br#"{"action":"created"}"#.to_vec();
    let headers = github_headers("star", &body, "gh-secret");

    let response = github_webhook(State(state), headers, Bytes::from(body))
        .await
        .unwrap();

    assert_eq!(status_of(&response), (StatusCode::ACCEPTED, "ignored"));
    assert!(queue.triggers().is_empty());
}

#[tokio::test]
async fn github_validation_can_be_disabled() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(
        AppConfig {
            validate_webhooks: false,
            webhook_github_secret: None,
            ..config()
        },
        queue.clone(),
    );
    let mut headers = HeaderMap::new();
    headers.insert("X-GitHub-Event", HeaderValue::from_static("pull_request"));

    let response = github_webhook(State(state), headers, Bytes::from(pull_request_body()))
        .await
        .unwrap();

    assert_eq!(status_of(&response), (StatusCode::ACCEPTED, "accepted"));
}

#[tokio::test]
async fn full_queue_answers_service_unavailable() {
    let queue = Arc::new(RecordingQueue::rejecting(QueueError::Full));
    let state = state_with(config(), queue);
    let body = pull_request_body();
    let headers = github_headers("pull_request", &body, "gh-secret");

    let err = github_webhook(State(state), headers, Bytes::from(body))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(err.retry_after, Some(5));
}

#[tokio::test]
async fn gitlab_requires_matching_token() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue.clone());
    let body = serde_json::to_vec(&json!({
        "object_kind": "push",
        "ref": "refs/heads/main",
        "checkout_sha": "def456",
        "user_username": "maintainer",
        "project": {
            "web_url": "https://gitlab.com/packit/hello",
            "path_with_namespace": "packit/hello"
        }
    }))
    .unwrap();

    let mut bad = HeaderMap::new();
    bad.insert("X-Gitlab-Token", HeaderValue::from_static("nope"));
    let err = gitlab_webhook(State(state.clone()), bad, Bytes::from(body.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::UNAUTHORIZED);

    let mut good = HeaderMap::new();
    good.insert("X-Gitlab-Token", HeaderValue::from_static("gl-token"));
    let response = gitlab_webhook(State(state), good, Bytes::from(body))
        .await
        .unwrap();
    assert_eq!(status_of(&response), (StatusCode::ACCEPTED, "accepted"));
    assert_eq!(queue.triggers(), vec![TriggerKind::Push]);
}

#[tokio::test]
async fn fedmsg_copr_end_is_queued_without_token_configured() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue.clone());
    let body = serde_json::to_vec(&json!({
        "topic": "org.fedoraproject.prod.copr.build.end",
        "build": 1044215,
        "chroot": "fedora-rawhide-x86_64",
        "status": 1,
        "owner": "packit",
        "copr": "packit-hello-world-7"
    }))
    .unwrap();

    let response = fedmsg_webhook(State(state), HeaderMap::new(), Bytes::from(body))
        .await
        .unwrap();

    assert_eq!(status_of(&response), (StatusCode::ACCEPTED, "accepted"));
    assert_eq!(queue.triggers(), vec![TriggerKind::BuildEnd]);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue);

    let err = fedmsg_webhook(State(state), HeaderMap::new(), Bytes::from_static(b"{not json"))
        .await
        .unwrap_err();

    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn testing_farm_result_checks_token_in_body() {
    let queue = Arc::new(RecordingQueue::default());
    let state = state_with(config(), queue.clone());
    let payload = |token: &str| {
        serde_json::to_vec(&json!({
            "token": token,
            "pipeline": {"id": "a1b2c3"},
            "result": "passed",
            "url": "https://artifacts.example/a1b2c3"
        }))
        .unwrap()
    };

    let err = testing_farm_results(State(state.clone()), Bytes::from(payload("bad")))
        .await
        .unwrap_err();
    assert_eq!(err.status, StatusCode::UNAUTHORIZED);

    let response = testing_farm_results(State(state), Bytes::from(payload("tf-secret")))
        .await
        .unwrap();
    assert_eq!(status_of(&response), (StatusCode::ACCEPTED, "accepted"));
    assert_eq!(queue.triggers(), vec![TriggerKind::TestResult]);
}

mod routing {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use crate::server::create_app;

    #[tokio::test]
    async fn gitlab_route_rejects_missing_token() {
        let app = create_app(state_with(config(), Arc::new(RecordingQueue::default())));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/gitlab")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"object_kind":"push"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_routes_only_accept_post() {
        let app = create_app(state_with(config(), Arc::new(RecordingQueue::default())));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/webhooks/github")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
