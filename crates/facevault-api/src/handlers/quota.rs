use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    response::Json,
};
use facevault_core::models::QuotaUsage;
use facevault_core::AppError;
use std::sync::Arc;

#[tracing::instrument(skip(state))]
pub async fn get_vectorization_quota(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<QuotaUsage>, HttpAppError> {
    let usage = state.quota.usage(&user_id).await.map_err(|e| {
        tracing::error!(error = %e, user_id = %user_id, "Failed to compute quota usage");
        AppError::from(e)
    })?;
    Ok(Json(usage))
}
