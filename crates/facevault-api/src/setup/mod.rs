//! Application setup and initialization
//!
//! Telemetry, file record store, detector, dispatch queue and routes, in that
//! order. `initialize_with` skips the first two so tests can supply their own
//! store and detector.

pub mod database;
pub mod routes;
pub mod server;
pub mod store;

use crate::state::AppState;
use anyhow::{Context, Result};
use facevault_core::Config;
use facevault_db::FileRecordStore;
use facevault_plugins::FaceDetector;
use facevault_services::{create_detector, VectorizationPipeline};
use std::sync::Arc;

/// Initialize the entire application
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    crate::telemetry::init_telemetry(config.log_format)?;
    tracing::info!(
        environment = %config.environment,
        store = ?config.store.backend,
        detector = ?config.detection.backend,
        "Configuration loaded and validated"
    );

    let store = store::setup_store(&config).await?;
    let detector = create_detector(&config.detection)
        .await
        .context("Failed to create face detection backend")?;

    initialize_with(&config, store, detector)
}

/// Build state and router around an existing store and detector.
pub fn initialize_with(
    config: &Config,
    store: Arc<dyn FileRecordStore>,
    detector: Arc<dyn FaceDetector>,
) -> Result<(Arc<AppState>, axum::Router)> {
    let pipeline = VectorizationPipeline::start(store.clone(), detector, config, None);
    let state = Arc::new(AppState::new(store, pipeline));
    let router = routes::setup_routes(config, state.clone())?;
    Ok((state, router))
}
