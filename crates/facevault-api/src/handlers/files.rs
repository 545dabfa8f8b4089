use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use facevault_core::models::FileRecord;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFilesQuery {
    pub with_faces: Option<bool>,
}

/// Current vectorization status and results of one file.
#[tracing::instrument(skip(state))]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    Path(file_id): Path<String>,
) -> Result<Json<FileRecord>, HttpAppError> {
    let record = state.files.get_file(&file_id).await?;
    Ok(Json(record))
}

#[tracing::instrument(skip(state))]
pub async fn list_user_files(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<UserFilesQuery>,
) -> Result<Json<serde_json::Value>, HttpAppError> {
    let files = state
        .files
        .list_user_files(&user_id, query.with_faces)
        .await?;

    Ok(Json(serde_json::json!({
        "files": files,
        "count": files.len()
    })))
}
