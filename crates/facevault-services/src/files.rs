//! Pull-based file status queries

use facevault_core::models::FileRecord;
use facevault_core::AppError;
use facevault_db::FileRecordStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct FileQueryService {
    store: Arc<dyn FileRecordStore>,
}

impl FileQueryService {
    pub fn new(store: Arc<dyn FileRecordStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_file(&self, file_id: &str) -> Result<FileRecord, AppError> {
        self.store
            .get(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file {}", file_id)))
    }

    /// Files of `user_id`, optionally only those with (or without) extracted
    /// faces from their last successful vectorization.
    #[tracing::instrument(skip(self))]
    pub async fn list_user_files(
        &self,
        user_id: &str,
        with_faces: Option<bool>,
    ) -> Result<Vec<FileRecord>, AppError> {
        let mut records = self.store.list_by_user(user_id).await?;
        if let Some(with_faces) = with_faces {
            records.retain(|r| r.has_extracted_faces == with_faces);
        }
        Ok(records)
    }
}
