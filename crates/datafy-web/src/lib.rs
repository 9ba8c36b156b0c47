//! HTTP trigger for snapshot runs, meant to be hit by an external cron.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use datafy_sync::{SnapshotError, SnapshotPipeline, SnapshotSummary};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "datafy-web";

#[async_trait]
pub trait SnapshotRunner: Send + Sync {
    async fn run(&self, user_ids: &[String]) -> Result<SnapshotSummary, SnapshotError>;
}

#[async_trait]
impl SnapshotRunner for SnapshotPipeline {
    async fn run(&self, user_ids: &[String]) -> Result<SnapshotSummary, SnapshotError> {
        self.snapshot_users(user_ids).await
    }
}

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<dyn SnapshotRunner>,
    /// Expected bearer secret. Empty rejects every request.
    pub cron_secret: String,
    pub tracked_user_ids: Vec<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/cron", get(cron_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("DATAFY_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);

    let pipeline = datafy_sync::pipeline_from_env().await?;
    let config = pipeline.config().clone();
    if config.cron_secret.is_empty() {
        warn!("CRON_SECRET is empty; every trigger request will be rejected");
    }
    let state = AppState {
        runner: Arc::new(pipeline),
        cron_secret: config.cron_secret,
        tracked_user_ids: config.tracked_user_ids,
    };

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "snapshot trigger listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

async fn cron_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !authorized(&headers, &state.cron_secret) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "body": "Unauthorized" })),
        )
            .into_response();
    }

    match state.runner.run(&state.tracked_user_ids).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({ "body": "Exited successfully!", "summary": summary })),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "triggered snapshot failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "body": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}
