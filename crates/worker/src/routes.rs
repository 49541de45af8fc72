use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use relay_pipeline::JobOutcome;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Body of `POST /run`.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    /// Caller-supplied job id; a UUID v4 is generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether ComfyUI answered a single probe.
    pub comfyui_reachable: bool,
    /// Whether a job is currently running.
    pub busy: bool,
}

/// POST /run -- process one job and return its outcome.
///
/// Requests queue on the single-permit gate. Job failures are part of the
/// 200 response body; only a closed gate yields an error status.
async fn run_job(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Result<Json<JobOutcome>, StatusCode> {
    let _permit = state.gate.acquire().await.map_err(|_| {
        tracing::warn!("Job gate closed, rejecting request");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let outcome = state
        .runner
        .run_with_cancellation(request.id, &request.input, state.shutdown.child_token())
        .await;
    Ok(Json(outcome))
}

/// GET /health -- returns worker and ComfyUI health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let comfyui_reachable = state.runner.api().ping().await.is_ok();
    let status = if comfyui_reachable { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        comfyui_reachable,
        busy: state.is_busy(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/run", post(run_job))
        .route("/health", get(health_check))
}
