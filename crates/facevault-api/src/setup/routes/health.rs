//! Health check handlers.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    status: &'static str,
    store: String,
    dispatch_queue: &'static str,
    live_jobs: usize,
}

pub(super) fn routes(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .route("/health", get(liveness_check))
        .route("/health/ready", get(readiness_check))
        .with_state(state)
}

/// Liveness probe - process is running.
async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "alive" })))
}

/// Readiness probe - store reachable and dispatch queue accepting jobs.
async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = match tokio::time::timeout(CHECK_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => "ready".to_string(),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Store readiness check failed");
            format!("not_ready: {}", e)
        }
        Err(_) => {
            tracing::error!("Store readiness check timed out");
            "timeout".to_string()
        }
    };
    let accepting = state.queue.is_accepting();

    let ready = store == "ready" && accepting;
    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" },
        store,
        dispatch_queue: if accepting { "accepting" } else { "draining" },
        live_jobs: state.queue.live_jobs(),
    };
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
