//! # Server Configuration
//!
//! Router, shared state and the serve loop. The HTTP side only verifies and
//! queues; a [`Worker`] running alongside drains the queue.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::context::ServiceContext;
use crate::handlers;
use crate::worker::{LocalTaskQueue, TaskQueue, Worker};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub queue: Arc<dyn TaskQueue>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/webhooks/github", post(handlers::webhooks::github_webhook))
        .route("/webhooks/gitlab", post(handlers::webhooks::gitlab_webhook))
        .route("/webhooks/fedmsg", post(handlers::webhooks::fedmsg_webhook))
        .route(
            "/testing-farm/results",
            post(handlers::webhooks::testing_farm_results),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
}

/// Starts the worker and serves HTTP until ctrl-c, then drains in-flight tasks.
pub async fn run_server(config: AppConfig, db: DatabaseConnection) -> Result<()> {
    let config = Arc::new(config);
    let db = Arc::new(db);
    let ctx = Arc::new(ServiceContext::from_config(config.clone(), db.clone())?);

    let (queue, receiver) = LocalTaskQueue::channel(config.queue_capacity);
    let shutdown = CancellationToken::new();
    let worker = tokio::spawn(Worker::new(ctx, receiver).run(shutdown.clone()));

    let state = AppState {
        config: config.clone(),
        db,
        queue: Arc::new(queue),
    };
    let app = create_app(state);

    let addr = config.bind_addr().context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, profile = %config.profile, deployment = %config.deployment, "Server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .context("axum server error")?;

    shutdown.cancel();
    worker.await.context("worker task join failed")?;
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::webhooks::github_webhook,
        crate::handlers::webhooks::gitlab_webhook,
        crate::handlers::webhooks::fedmsg_webhook,
        crate::handlers::webhooks::testing_farm_results,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthResponse,
            crate::handlers::webhooks::WebhookAcceptResponse,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service metadata and health"),
        (name = "webhooks", description = "Forge, message-bus and Testing Farm intake"),
    ),
    info(
        title = "Forge Dispatch API",
        description = "Webhook intake for CI job dispatch across GitHub, GitLab and Pagure",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
