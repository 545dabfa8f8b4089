//! Server startup and graceful shutdown

use anyhow::Result;
use axum::Router;
use facevault_core::Config;
use std::sync::Arc;
use std::time::Duration;

use crate::state::AppState;

/// Serve until SIGINT/SIGTERM, then drain the dispatch queue. Jobs still
/// running after one job lifetime are cancelled.
pub async fn start_server(config: &Config, app: Router, state: Arc<AppState>) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.server_port);
    tracing::info!(addr = %addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(
        max_workers = config.queue.max_workers,
        max_queue_depth = config.queue.max_queue_depth,
        max_batch_size = config.dispatch.max_batch_size,
        "Server ready and accepting connections"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(config.queue.job_timeout_secs);
    tracing::info!(grace_secs = grace.as_secs(), "HTTP server stopped, draining dispatch queue");
    state.queue.shutdown(grace).await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM. A signal whose handler cannot be
/// installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal");
        },
    }

    tracing::info!("Shutting down gracefully...");
}
