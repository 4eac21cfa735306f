//! # Webhook Handlers
//!
//! Intake endpoints for forge webhooks, the message-bus relay and Testing
//! Farm results. Payloads are verified, parsed into events and queued;
//! processing happens on the worker.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::error::{ApiError, bad_request, service_unavailable};
use crate::events::{Event, parse_fedmsg, parse_github, parse_gitlab, parse_testing_farm_results};
use crate::server::AppState;
use crate::webhook_verification::{
    GITHUB_SIGNATURE_HEADER, GITLAB_TOKEN_HEADER, VerificationError, verify_github_signature,
    verify_shared_token,
};
use crate::worker::{QueueError, QueuedTask};

const FEDMSG_TOKEN_HEADER: &str = "X-Fedmsg-Token";

/// Webhook accept response
#[derive(Debug, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct WebhookAcceptResponse {
    /// `accepted`, `ignored` or `Pong!`
    pub status: String,
}

type WebhookResponse = Result<(StatusCode, Json<WebhookAcceptResponse>), ApiError>;

fn respond(status: StatusCode, text: &str) -> WebhookResponse {
    Ok((
        status,
        Json(WebhookAcceptResponse {
            status: text.to_string(),
        }),
    ))
}

fn record(source: &'static str, outcome: &'static str) {
    counter!("webhook_requests_total", "source" => source, "outcome" => outcome).increment(1);
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn parse_json(source: &'static str, body: &[u8]) -> Result<JsonValue, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        record(source, "malformed");
        bad_request(&format!("invalid JSON payload: {err}"))
    })
}

/// Queues the parsed event, or acknowledges an uninteresting payload.
fn enqueue(state: &AppState, source: &'static str, event: Option<Event>) -> WebhookResponse {
    let Some(event) = event else {
        debug!(source, "Ignoring webhook payload");
        record(source, "ignored");
        return respond(StatusCode::ACCEPTED, "ignored");
    };

    let trigger = event.trigger_kind();
    match state.queue.submit(QueuedTask::ProcessEvent(event)) {
        Ok(()) => {
            info!(source, trigger = %trigger, "Event queued");
            record(source, "accepted");
            respond(StatusCode::ACCEPTED, "accepted")
        }
        Err(err) => {
            warn!(source, trigger = %trigger, error = %err, "Failed to queue event");
            record(source, "rejected");
            let api_error = service_unavailable(&err.to_string());
            Err(if err == QueueError::Full {
                api_error.with_retry_after(5)
            } else {
                api_error
            })
        }
    }
}

fn verification_failed(source: &'static str, err: VerificationError) -> ApiError {
    warn!(source, error = %err, "Webhook verification failed");
    record(source, "unauthorized");
    err.into()
}

fn not_configured(source: &'static str) -> VerificationError {
    VerificationError::NotConfigured {
        source_name: source.to_string(),
    }
}

/// GitHub webhook
#[utoipa::path(
    post,
    path = "/webhooks/github",
    params(
        ("X-GitHub-Event" = String, Header, description = "GitHub event name"),
        ("X-Hub-Signature-256" = Option<String>, Header, description = "HMAC-SHA256 signature of the body"),
    ),
    request_body(content = Option<JsonValue>, description = "GitHub webhook payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Ping answered", body = WebhookAcceptResponse),
        (status = 202, description = "Event accepted or ignored", body = WebhookAcceptResponse),
        (status = 400, description = "Malformed payload or missing event header", body = ApiError),
        (status = 401, description = "Missing or invalid signature", body = ApiError),
        (status = 503, description = "Task queue unavailable", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResponse {
    const SOURCE: &str = "github";

    if state.config.validate_webhooks {
        let secret = state
            .config
            .webhook_github_secret
            .as_deref()
            .ok_or_else(|| verification_failed(SOURCE, not_configured(SOURCE)))?;
        let signature = header(&headers, GITHUB_SIGNATURE_HEADER).unwrap_or_default();
        verify_github_signature(&body, signature, secret)
            .map_err(|err| verification_failed(SOURCE, err))?;
    }

    let Some(event_type) = header(&headers, "X-GitHub-Event") else {
        record(SOURCE, "malformed");
        return Err(bad_request("missing X-GitHub-Event header"));
    };
    if event_type == "ping" {
        record(SOURCE, "ping");
        return respond(StatusCode::OK, "Pong!");
    }

    let payload = parse_json(SOURCE, &body)?;
    enqueue(&state, SOURCE, parse_github(event_type, &payload))
}

/// GitLab webhook
#[utoipa::path(
    post,
    path = "/webhooks/gitlab",
    params(
        ("X-Gitlab-Token" = Option<String>, Header, description = "Shared webhook token"),
    ),
    request_body(content = Option<JsonValue>, description = "GitLab webhook payload", content_type = "application/json"),
    responses(
        (status = 202, description = "Event accepted or ignored", body = WebhookAcceptResponse),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 401, description = "Missing or invalid token", body = ApiError),
        (status = 503, description = "Task queue unavailable", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn gitlab_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResponse {
    const SOURCE: &str = "gitlab";

    if state.config.validate_webhooks {
        let expected = state
            .config
            .webhook_gitlab_token
            .as_deref()
            .ok_or_else(|| verification_failed(SOURCE, not_configured(SOURCE)))?;
        verify_shared_token(
            header(&headers, GITLAB_TOKEN_HEADER),
            expected,
            GITLAB_TOKEN_HEADER,
        )
        .map_err(|err| verification_failed(SOURCE, err))?;
    }

    let payload = parse_json(SOURCE, &body)?;
    enqueue(&state, SOURCE, parse_gitlab(&payload))
}

/// Message-bus relay (Copr build state, Pagure PR activity)
#[utoipa::path(
    post,
    path = "/webhooks/fedmsg",
    params(
        ("X-Fedmsg-Token" = Option<String>, Header, description = "Relay token, required when configured"),
    ),
    request_body(content = Option<JsonValue>, description = "Message with `topic` and `msg`", content_type = "application/json"),
    responses(
        (status = 202, description = "Message accepted or ignored", body = WebhookAcceptResponse),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 401, description = "Invalid relay token", body = ApiError),
        (status = 503, description = "Task queue unavailable", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn fedmsg_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> WebhookResponse {
    const SOURCE: &str = "fedmsg";

    if let Some(expected) = state.config.webhook_fedmsg_token.as_deref() {
        verify_shared_token(
            header(&headers, FEDMSG_TOKEN_HEADER),
            expected,
            FEDMSG_TOKEN_HEADER,
        )
        .map_err(|err| verification_failed(SOURCE, err))?;
    }

    let payload = parse_json(SOURCE, &body)?;
    enqueue(&state, SOURCE, parse_fedmsg(&payload))
}

/// Testing Farm result notification
#[utoipa::path(
    post,
    path = "/testing-farm/results",
    request_body(content = Option<JsonValue>, description = "Testing Farm result; carries the API token", content_type = "application/json"),
    responses(
        (status = 202, description = "Result accepted or ignored", body = WebhookAcceptResponse),
        (status = 400, description = "Malformed payload", body = ApiError),
        (status = 401, description = "Invalid token", body = ApiError),
        (status = 503, description = "Task queue unavailable", body = ApiError)
    ),
    tag = "webhooks"
)]
pub async fn testing_farm_results(State(state): State<AppState>, body: Bytes) -> WebhookResponse {
    const SOURCE: &str = "testing_farm";

    let payload = parse_json(SOURCE, &body)?;
    if state.config.validate_webhooks {
        let expected = state
            .config
            .testing_farm_secret
            .as_deref()
            .ok_or_else(|| verification_failed(SOURCE, not_configured(SOURCE)))?;
        let token = payload.get("token").and_then(JsonValue::as_str);
        verify_shared_token(token, expected, "token")
            .map_err(|err| verification_failed(SOURCE, err))?;
    }

    enqueue(&state, SOURCE, parse_testing_farm_results(&payload))
}
