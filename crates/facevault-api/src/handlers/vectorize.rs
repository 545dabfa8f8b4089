use crate::error::{HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use facevault_core::models::{BatchRequest, BatchResult};
use facevault_core::AppError;
use std::sync::Arc;
use uuid::Uuid;

/// Submit a batch of files for face vectorization. Returns one disposition per
/// distinct file id; the jobs run in the background.
#[tracing::instrument(skip(state, request), fields(batch_size = request.file_ids.len()))]
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<BatchRequest>,
) -> Result<Json<BatchResult>, HttpAppError> {
    let result = state.dispatcher.submit_batch(request).await?;
    Ok(Json(result))
}

/// Cancel the live jobs of a batch; they end `Failed` with cause `cancelled`.
#[tracing::instrument(skip(state))]
pub async fn cancel_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    if !state.dispatcher.cancel_batch(batch_id) {
        return Err(AppError::NotFound(format!("No live jobs for batch {}", batch_id)).into());
    }

    tracing::info!(batch_id = %batch_id, "Batch cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "batchId": batch_id, "cancelled": true })),
    ))
}
