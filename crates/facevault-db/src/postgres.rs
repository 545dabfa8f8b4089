//! PostgreSQL file record store
//!
//! Guarded writes are a single `UPDATE ... WHERE status = $guard` statement, so
//! the database row lock provides read-modify-write consistency per record.
//! The field rules of each transition mirror `StatusTransition::apply_to`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use facevault_core::models::{
    FaceRecord, FileRecord, StatusGuard, StatusTransition, VectorizationStatus,
};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{check_transition, CasOutcome, FileRecordStore};

const FILE_COLUMNS: &str = r#"
    id, user_id, file_name, file_type, file_size, download_url, uploaded_at,
    vectorization_status, vectorization_completed_at, vectorization_error,
    face_count, extracted_faces, has_extracted_faces,
    vectorization_attempt, vectorization_first_attempt, vectorization_batch_id,
    vectorization_queued_at, vectorization_updated_at
"#;

#[derive(sqlx::FromRow)]
struct FileRecordRow {
    id: String,
    user_id: Option<String>,
    file_name: String,
    file_type: String,
    file_size: i64,
    download_url: Option<String>,
    uploaded_at: DateTime<Utc>,
    vectorization_status: String,
    vectorization_completed_at: Option<DateTime<Utc>>,
    vectorization_error: Option<String>,
    face_count: i32,
    extracted_faces: Json<Vec<FaceRecord>>,
    has_extracted_faces: bool,
    vectorization_attempt: i32,
    vectorization_first_attempt: i32,
    vectorization_batch_id: Option<Uuid>,
    vectorization_queued_at: Option<DateTime<Utc>>,
    vectorization_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<FileRecordRow> for FileRecord {
    type Error = StoreError;

    fn try_from(row: FileRecordRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };
        let vectorization_status = row
            .vectorization_status
            .parse::<VectorizationStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let file_size =
            u64::try_from(row.file_size).map_err(|_| corrupt("negative file_size".to_string()))?;
        let face_count =
            u32::try_from(row.face_count).map_err(|_| corrupt("negative face_count".to_string()))?;
        let vectorization_attempt = u32::try_from(row.vectorization_attempt)
            .map_err(|_| corrupt("negative vectorization_attempt".to_string()))?;
        let vectorization_first_attempt = u32::try_from(row.vectorization_first_attempt)
            .map_err(|_| corrupt("negative vectorization_first_attempt".to_string()))?;

        Ok(FileRecord {
            id: row.id,
            user_id: row.user_id,
            file_name: row.file_name,
            file_type: row.file_type,
            file_size,
            download_url: row.download_url,
            uploaded_at: row.uploaded_at,
            vectorization_status,
            vectorization_completed_at: row.vectorization_completed_at,
            vectorization_error: row.vectorization_error,
            face_count,
            extracted_faces: row.extracted_faces.0,
            has_extracted_faces: row.has_extracted_faces,
            vectorization_attempt,
            vectorization_first_attempt,
            vectorization_batch_id: row.vectorization_batch_id,
            vectorization_queued_at: row.vectorization_queued_at,
            vectorization_updated_at: row.vectorization_updated_at,
        })
    }
}

fn to_db_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Clone)]
pub struct PgFileRecordStore {
    pool: PgPool,
}

impl PgFileRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileRecordStore for PgFileRecordStore {
    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "select"
    ))]
    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        let row: Option<FileRecordRow> =
            sqlx::query_as(&format!("SELECT {} FROM files WHERE id = $1", FILE_COLUMNS))
                .bind(file_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, file_id = %file_id, "Failed to load file record");
                    StoreError::from(e)
                })?;

        row.map(FileRecord::try_from).transpose()
    }

    #[tracing::instrument(skip(self, transition), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "update",
        to = %transition.to
    ))]
    async fn compare_and_set_status(
        &self,
        file_id: &str,
        guard: StatusGuard,
        transition: StatusTransition,
    ) -> Result<CasOutcome, StoreError> {
        check_transition(&guard, &transition)?;

        let face_count = transition.faces.as_ref().map(|f| to_db_int(f.len() as u32));
        let faces = transition.faces.as_ref().map(|f| Json(f.clone()));

        let query = format!(
            r#"
            UPDATE files SET
                vectorization_status = $4,
                vectorization_updated_at = $5,
                vectorization_attempt = COALESCE($6, vectorization_attempt),
                vectorization_first_attempt = COALESCE($7, vectorization_first_attempt),
                vectorization_queued_at = COALESCE($8, vectorization_queued_at),
                vectorization_completed_at = CASE
                    WHEN $4 IN ('completed', 'failed') THEN $5 ELSE NULL END,
                vectorization_error = CASE WHEN $4 = 'failed' THEN $9 ELSE NULL END,
                extracted_faces = CASE
                    WHEN $4 = 'completed' THEN $10 ELSE extracted_faces END,
                face_count = CASE WHEN $4 = 'completed' THEN $11 ELSE face_count END,
                has_extracted_faces = CASE
                    WHEN $4 = 'completed' THEN $11 > 0 ELSE has_extracted_faces END,
                vectorization_batch_id = COALESCE($12, vectorization_batch_id)
            WHERE id = $1
              AND vectorization_status = $2
              AND ($3::INTEGER IS NULL OR vectorization_attempt = $3)
            RETURNING {}
            "#,
            FILE_COLUMNS
        );

        let updated: Option<FileRecordRow> = sqlx::query_as(&query)
            .bind(file_id)
            .bind(guard.status.as_str())
            .bind(guard.attempt.map(to_db_int))
            .bind(transition.to.as_str())
            .bind(transition.at)
            .bind(transition.attempt.map(to_db_int))
            .bind(transition.first_attempt.map(to_db_int))
            .bind(transition.queued_at)
            .bind(transition.error.as_deref())
            .bind(faces)
            .bind(face_count)
            .bind(transition.batch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, file_id = %file_id, "Guarded status update failed");
                StoreError::from(e)
            })?;

        match updated {
            Some(row) => Ok(CasOutcome::Applied(FileRecord::try_from(row)?)),
            None => {
                let current = self.get(file_id).await?;
                tracing::debug!(
                    file_id = %file_id,
                    expected = %guard.status,
                    actual = ?current.as_ref().map(|r| r.vectorization_status),
                    "Guarded status update lost"
                );
                Ok(CasOutcome::Conflict(current))
            }
        }
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "select"
    ))]
    async fn list_by_user(&self, user_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let rows: Vec<FileRecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM files WHERE user_id = $1 ORDER BY uploaded_at DESC, id",
            FILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "select"
    ))]
    async fn list_stale(
        &self,
        statuses: &[VectorizationStatus],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FileRecord>, StoreError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows: Vec<FileRecordRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM files
            WHERE vectorization_status = ANY($1)
              AND vectorization_updated_at < $2
            ORDER BY vectorization_updated_at
            LIMIT $3
            "#,
            FILE_COLUMNS
        ))
        .bind(&statuses)
        .bind(updated_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FileRecord::try_from).collect()
    }

    #[tracing::instrument(skip(self, record), fields(
        db.system = "postgresql",
        db.table = "files",
        db.operation = "insert",
        file_id = %record.id
    ))]
    async fn insert(&self, record: FileRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO files (
                id, user_id, file_name, file_type, file_size, download_url, uploaded_at,
                vectorization_status, vectorization_completed_at, vectorization_error,
                face_count, extracted_faces, has_extracted_faces,
                vectorization_attempt, vectorization_first_attempt, vectorization_batch_id,
                vectorization_queued_at, vectorization_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(&record.id)
        .bind(&record.user_id)
        .bind(&record.file_name)
        .bind(&record.file_type)
        .bind(i64::try_from(record.file_size).unwrap_or(i64::MAX))
        .bind(&record.download_url)
        .bind(record.uploaded_at)
        .bind(record.vectorization_status.as_str())
        .bind(record.vectorization_completed_at)
        .bind(&record.vectorization_error)
        .bind(to_db_int(record.face_count))
        .bind(Json(&record.extracted_faces))
        .bind(record.has_extracted_faces)
        .bind(to_db_int(record.vectorization_attempt))
        .bind(to_db_int(record.vectorization_first_attempt))
        .bind(record.vectorization_batch_id)
        .bind(record.vectorization_queued_at)
        .bind(record.vectorization_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
