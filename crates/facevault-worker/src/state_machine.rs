//! Per-file vectorization state machine
//!
//! `NotStarted -> Queued -> Processing -> {Completed, Failed}`, with
//! `Failed`/`Completed -> Queued` on a new submission and `Queued`/`Processing
//! -> Queued` on a sweep re-queue. Every transition is a guarded write keyed on
//! the expected status and attempt number; a lost guard is reported back as a
//! conflict and never retried blindly.

use chrono::Utc;
use facevault_core::models::{
    FaceRecord, FailureCause, FileRecord, StatusGuard, StatusTransition, VectorizationJob,
    VectorizationStatus,
};
use facevault_db::{CasOutcome, FileRecordStore, StoreError};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct FileStateMachine {
    store: Arc<dyn FileRecordStore>,
}

impl FileStateMachine {
    pub fn new(store: Arc<dyn FileRecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn FileRecordStore> {
        &self.store
    }

    /// New submission of `record` in `batch_id`: starts attempt
    /// `record.attempt + 1` and a fresh attempt budget.
    pub async fn mark_queued(
        &self,
        record: &FileRecord,
        batch_id: Uuid,
    ) -> Result<CasOutcome, StoreError> {
        let attempt = record.vectorization_attempt + 1;
        let outcome = self
            .store
            .compare_and_set_status(
                &record.id,
                StatusGuard::at_attempt(record.vectorization_status, record.vectorization_attempt),
                StatusTransition::queued(attempt, batch_id, Utc::now()),
            )
            .await?;
        log_outcome(&record.id, attempt, VectorizationStatus::Queued, &outcome);
        Ok(outcome)
    }

    /// Sweep re-queue of a presumed-lost job: next attempt, same budget.
    pub async fn mark_requeued(&self, record: &FileRecord) -> Result<CasOutcome, StoreError> {
        let attempt = record.vectorization_attempt + 1;
        let outcome = self
            .store
            .compare_and_set_status(
                &record.id,
                StatusGuard::at_attempt(record.vectorization_status, record.vectorization_attempt),
                StatusTransition::requeued(attempt, Utc::now()),
            )
            .await?;
        if outcome.is_applied() {
            tracing::warn!(
                file_id = %record.id,
                from = %record.vectorization_status,
                attempt,
                "Re-queued stale vectorization job"
            );
        } else {
            log_outcome(&record.id, attempt, VectorizationStatus::Queued, &outcome);
        }
        Ok(outcome)
    }

    /// Worker claim: `Queued -> Processing`.
    pub async fn mark_processing(&self, job: &VectorizationJob) -> Result<CasOutcome, StoreError> {
        let outcome = self
            .store
            .compare_and_set_status(
                &job.file_id,
                StatusGuard::at_attempt(VectorizationStatus::Queued, job.attempt),
                StatusTransition::processing(Utc::now()),
            )
            .await?;
        log_outcome(&job.file_id, job.attempt, VectorizationStatus::Processing, &outcome);
        Ok(outcome)
    }

    /// `Processing -> Completed`; `attempt` is the attempt that produced the result.
    pub async fn mark_completed(
        &self,
        job: &VectorizationJob,
        faces: Vec<FaceRecord>,
        attempt: u32,
    ) -> Result<CasOutcome, StoreError> {
        let face_count = faces.len();
        let outcome = self
            .store
            .compare_and_set_status(
                &job.file_id,
                StatusGuard::at_attempt(VectorizationStatus::Processing, job.attempt),
                StatusTransition::completed(faces, attempt, Utc::now()),
            )
            .await?;
        if outcome.is_applied() {
            tracing::info!(
                file_id = %job.file_id,
                attempt,
                face_count,
                "Vectorization completed"
            );
        } else {
            log_outcome(&job.file_id, attempt, VectorizationStatus::Completed, &outcome);
        }
        Ok(outcome)
    }

    /// `from -> Failed` with a classified cause. `from` is Processing, or
    /// Queued for cancellation and exhausted budgets.
    pub async fn mark_failed(
        &self,
        job: &VectorizationJob,
        from: VectorizationStatus,
        cause: &FailureCause,
        attempt: Option<u32>,
    ) -> Result<CasOutcome, StoreError> {
        let outcome = self
            .store
            .compare_and_set_status(
                &job.file_id,
                StatusGuard::at_attempt(from, job.attempt),
                StatusTransition::failed(cause.to_string(), attempt, Utc::now()),
            )
            .await?;
        if outcome.is_applied() {
            tracing::info!(
                file_id = %job.file_id,
                attempt = attempt.unwrap_or(job.attempt),
                cause = %cause,
                "Vectorization failed"
            );
        } else {
            log_outcome(&job.file_id, job.attempt, VectorizationStatus::Failed, &outcome);
        }
        Ok(outcome)
    }
}

fn log_outcome(file_id: &str, attempt: u32, to: VectorizationStatus, outcome: &CasOutcome) {
    match outcome {
        CasOutcome::Applied(_) => {
            tracing::debug!(file_id = %file_id, attempt, status = %to, "Status transition applied")
        }
        CasOutcome::Conflict(current) => tracing::warn!(
            file_id = %file_id,
            attempt,
            to = %to,
            current_status = ?current.as_ref().map(|r| r.vectorization_status),
            current_attempt = ?current.as_ref().map(|r| r.vectorization_attempt),
            "Guarded status write lost, discarding"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facevault_db::InMemoryFileRecordStore;

    fn setup(record: FileRecord) -> (FileStateMachine, InMemoryFileRecordStore) {
        let store = InMemoryFileRecordStore::with_records([record]);
        (FileStateMachine::new(Arc::new(store.clone())), store)
    }

    #[tokio::test]
    async fn full_lifecycle_records_attempt() {
        let (sm, store) = setup(FileRecord::new("a", "a.jpg", "image/jpeg", 4096));
        let record = store.get("a").await.unwrap().unwrap();

        assert!(sm.mark_queued(&record, Uuid::new_v4()).await.unwrap().is_applied());
        let job = VectorizationJob::new("a", None, 1);
        assert!(sm.mark_processing(&job).await.unwrap().is_applied());
        assert!(sm.mark_completed(&job, Vec::new(), 3).await.unwrap().is_applied());

        let done = store.get("a").await.unwrap().unwrap();
        assert_eq!(done.vectorization_status, VectorizationStatus::Completed);
        assert_eq!(done.vectorization_attempt, 3);
        assert_eq!(done.face_count, 0);
        assert!(!done.has_extracted_faces);
    }

    #[tokio::test]
    async fn second_queue_of_same_snapshot_conflicts() {
        let (sm, store) = setup(FileRecord::new("a", "a.jpg", "image/jpeg", 4096));
        let snapshot = store.get("a").await.unwrap().unwrap();

        assert!(sm.mark_queued(&snapshot, Uuid::new_v4()).await.unwrap().is_applied());
        assert!(!sm.mark_queued(&snapshot, Uuid::new_v4()).await.unwrap().is_applied());
    }

    #[tokio::test]
    async fn old_generation_cannot_complete_after_requeue() {
        let (sm, store) = setup(FileRecord::new("a", "a.jpg", "image/jpeg", 4096));
        let record = store.get("a").await.unwrap().unwrap();
        let batch_id = Uuid::new_v4();
        sm.mark_queued(&record, batch_id).await.unwrap();
        let old_job = VectorizationJob::new("a", Some(batch_id), 1);
        sm.mark_processing(&old_job).await.unwrap();

        // Sweep moves the file on to attempt 2 while the old worker is still running.
        let stuck = store.get("a").await.unwrap().unwrap();
        assert!(sm.mark_requeued(&stuck).await.unwrap().is_applied());
        assert_eq!(stuck.vectorization_batch_id, Some(batch_id));
        let new_job = VectorizationJob::requeue("a", stuck.vectorization_batch_id, 2, 1);
        sm.mark_processing(&new_job).await.unwrap();

        let late = sm.mark_completed(&old_job, Vec::new(), 1).await.unwrap();
        assert!(!late.is_applied());
        let current = store.get("a").await.unwrap().unwrap();
        assert_eq!(current.vectorization_status, VectorizationStatus::Processing);
        assert_eq!(current.vectorization_attempt, 2);
    }

    #[tokio::test]
    async fn cancelled_while_queued() {
        let (sm, store) = setup(FileRecord::new("a", "a.jpg", "image/jpeg", 4096));
        let record = store.get("a").await.unwrap().unwrap();
        sm.mark_queued(&record, Uuid::new_v4()).await.unwrap();
        let job = VectorizationJob::new("a", None, 1);

        let outcome = sm
            .mark_failed(&job, VectorizationStatus::Queued, &FailureCause::Cancelled, None)
            .await
            .unwrap();
        assert!(outcome.is_applied());
        let failed = store.get("a").await.unwrap().unwrap();
        assert_eq!(failed.vectorization_error.as_deref(), Some("cancelled"));
        assert!(failed.vectorization_completed_at.is_some());
    }
}
