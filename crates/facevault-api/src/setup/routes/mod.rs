//! Route configuration and setup.
//!
//! Vectorization and file routes live under the versioned API prefix; health
//! checks are in [health](health).

mod health;

use crate::constants::{API_PREFIX, DEFAULT_HTTP_CONCURRENCY_LIMIT, MAX_REQUEST_BODY_BYTES};
use crate::handlers;
use crate::state::AppState;
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use facevault_core::Config;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Setup all application routes
pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Result<Router<()>, anyhow::Error> {
    let cors = setup_cors(config)?;

    let http_concurrency_limit = std::env::var("HTTP_CONCURRENCY_LIMIT")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(DEFAULT_HTTP_CONCURRENCY_LIMIT)
        .max(1);

    let app = health::routes(state.clone())
        .nest(API_PREFIX, api_routes(state))
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

fn api_routes(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .route(
            "/vectorize/batch",
            post(handlers::vectorize::submit_batch),
        )
        .route(
            "/vectorize/batches/{batch_id}/cancel",
            post(handlers::vectorize::cancel_batch),
        )
        .route("/files/{file_id}", get(handlers::files::get_file))
        .route(
            "/users/{user_id}/files",
            get(handlers::files::list_user_files),
        )
        .route(
            "/users/{user_id}/vectorization-quota",
            get(handlers::quota::get_vectorization_quota),
        )
        .with_state(state)
}

fn setup_cors(config: &Config) -> Result<CorsLayer, anyhow::Error> {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let cors = if config.cors_origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|o| o.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Invalid CORS origin: {}", e))?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(Any)
    };
    Ok(cors)
}
