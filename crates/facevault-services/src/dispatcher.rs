//! Batch vectorization dispatcher
//!
//! Validates a batch, reads every requested record, decides per file whether
//! it is eligible and hands eligible files to the dispatch queue. Returns one
//! disposition per distinct file id without waiting for any job to finish.
//!
//! Eligibility, in order: the record exists (and belongs to the batch's user
//! when the batch is user-scoped), the file is an image, the file is larger
//! than the minimum size, its status allows a new submission, and the user
//! has quota left.

use facevault_core::models::{
    BatchRequest, BatchResult, DispatchError, Disposition, FileRecord, QuotaUsage, SkipReason,
    VectorizationStatus,
};
use facevault_core::{AppError, DispatchSettings};
use facevault_db::FileRecordStore;
use facevault_worker::{Admission, DispatchQueue, EnqueueError};
use std::sync::Arc;
use uuid::Uuid;

use crate::quota::QuotaService;

const IMAGE_TYPE_PREFIX: &str = "image/";

/// Re-reads after a lost `Queued` write before giving up on a file.
const MAX_ADMIT_CONFLICTS: usize = 2;

#[derive(Clone)]
pub struct BatchDispatcher {
    store: Arc<dyn FileRecordStore>,
    queue: DispatchQueue,
    quota: QuotaService,
    settings: DispatchSettings,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn FileRecordStore>,
        queue: DispatchQueue,
        quota: QuotaService,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            queue,
            quota,
            settings,
        }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Submit a batch. Skips and per-file admission failures are dispositions;
    /// only an invalid batch or an unreachable store is an error.
    #[tracing::instrument(
        skip(self, request),
        fields(batch_size = request.file_ids.len(), user_id = ?request.user_id, force = request.force)
    )]
    pub async fn submit_batch(&self, request: BatchRequest) -> Result<BatchResult, AppError> {
        let file_ids = request.unique_file_ids();
        if file_ids.is_empty() {
            return Err(AppError::InvalidInput(
                "Batch must contain at least one file id".to_string(),
            ));
        }
        if file_ids.len() > self.settings.max_batch_size {
            return Err(AppError::InvalidInput(format!(
                "Batch contains {} files, maximum is {}",
                file_ids.len(),
                self.settings.max_batch_size
            )));
        }

        // All reads happen before the first admission so a store outage fails
        // the whole batch without admitting part of it.
        let mut records = Vec::with_capacity(file_ids.len());
        for file_id in &file_ids {
            let record = self.store.get(file_id).await.map_err(|e| {
                tracing::error!(file_id = %file_id, error = %e, "Failed to read file record");
                AppError::from(e)
            })?;
            records.push((file_id.clone(), record));
        }
        // Held until the last admission so concurrent batches of one user
        // cannot both spend the same remaining quota.
        let _quota_lock = match request.user_id.as_deref() {
            Some(user_id) if self.quota.daily_limit() > 0 => {
                Some(self.quota.lock_user(user_id).await)
            }
            _ => None,
        };
        let mut remaining_quota = self.remaining_quota(&request).await?;

        let batch_id = Uuid::new_v4();
        let mut result = BatchResult::new(batch_id);

        for (file_id, record) in records {
            let disposition = match check_eligibility(
                record.as_ref(),
                &request,
                self.settings.min_file_size_bytes,
            ) {
                Err(reason) => Disposition::Skipped { reason },
                Ok(_) if remaining_quota == Some(0) => Disposition::Skipped {
                    reason: SkipReason::QuotaExceeded,
                },
                Ok(record) => self.admit(record, batch_id, &request).await,
            };

            if disposition.is_accepted() {
                if let Some(remaining) = remaining_quota.as_mut() {
                    *remaining = remaining.saturating_sub(1);
                }
            }
            tracing::debug!(file_id = %file_id, disposition = ?disposition, "File dispatched");
            result.results.insert(file_id, disposition);
        }

        tracing::info!(
            batch_id = %batch_id,
            requested = file_ids.len(),
            accepted = result.accepted_count(),
            "Batch submitted"
        );
        Ok(result)
    }

    /// Cancel the live jobs of a batch. False when nothing of it is running.
    pub fn cancel_batch(&self, batch_id: Uuid) -> bool {
        self.queue.cancel_batch(batch_id)
    }

    pub async fn quota_usage(&self, user_id: &str) -> Result<QuotaUsage, AppError> {
        Ok(self.quota.usage(user_id).await?)
    }

    async fn remaining_quota(&self, request: &BatchRequest) -> Result<Option<u32>, AppError> {
        let Some(user_id) = request.user_id.as_deref() else {
            return Ok(None);
        };
        if self.quota.daily_limit() == 0 {
            return Ok(None);
        }
        Ok(self.quota.usage(user_id).await?.remaining())
    }

    async fn admit(&self, record: &FileRecord, batch_id: Uuid, request: &BatchRequest) -> Disposition {
        let mut current = record.clone();

        for _ in 0..=MAX_ADMIT_CONFLICTS {
            match self
                .queue
                .admit(&current, Admission::New { batch_id })
                .await
            {
                Ok(job) => return Disposition::Accepted { attempt: job.attempt },
                Err(EnqueueError::AlreadyClaimed(_)) => {
                    return Disposition::Skipped {
                        reason: SkipReason::InFlight,
                    }
                }
                Err(EnqueueError::Overloaded) => {
                    return Disposition::Failed {
                        error: DispatchError::Overloaded,
                    }
                }
                Err(EnqueueError::ShuttingDown) => {
                    return Disposition::Failed {
                        error: DispatchError::ShuttingDown,
                    }
                }
                Err(EnqueueError::Store(e)) => {
                    tracing::error!(file_id = %current.id, error = %e, "Failed to queue file");
                    return Disposition::Failed {
                        error: DispatchError::StoreUnavailable,
                    };
                }
                // The record changed since it was read: judge it again as it is now.
                Err(EnqueueError::Conflict(now)) => {
                    let now = now.map(|boxed| *boxed);
                    match check_eligibility(now.as_ref(), request, self.settings.min_file_size_bytes) {
                        Ok(_) => {}
                        Err(reason) => return Disposition::Skipped { reason },
                    }
                    if let Some(now) = now {
                        current = now;
                    }
                }
            }
        }

        tracing::warn!(file_id = %current.id, "File kept changing during submission");
        Disposition::Skipped {
            reason: SkipReason::InFlight,
        }
    }
}

/// Rules 1-4 of the eligibility policy, in order.
fn check_eligibility<'a>(
    record: Option<&'a FileRecord>,
    request: &BatchRequest,
    min_file_size_bytes: u64,
) -> Result<&'a FileRecord, SkipReason> {
    let record = record.ok_or(SkipReason::NotFound)?;
    if let Some(user_id) = request.user_id.as_deref() {
        if !record.is_owned_by(user_id) {
            return Err(SkipReason::NotFound);
        }
    }
    if !record
        .file_type
        .to_ascii_lowercase()
        .starts_with(IMAGE_TYPE_PREFIX)
    {
        return Err(SkipReason::UnsupportedType);
    }
    if record.file_size <= min_file_size_bytes {
        return Err(SkipReason::TooSmall);
    }
    match record.vectorization_status {
        VectorizationStatus::NotStarted | VectorizationStatus::Failed => Ok(record),
        VectorizationStatus::Completed if request.force => Ok(record),
        VectorizationStatus::Completed => Err(SkipReason::AlreadyProcessed),
        VectorizationStatus::Queued | VectorizationStatus::Processing => Err(SkipReason::InFlight),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, size: u64) -> FileRecord {
        FileRecord::new(id, format!("{}.jpg", id), "image/jpeg", size)
    }

    fn eligibility(record: Option<&FileRecord>, request: &BatchRequest) -> Result<(), SkipReason> {
        check_eligibility(record, request, 1024).map(|_| ())
    }

    #[test]
    fn rules_apply_in_order() {
        let request = BatchRequest::new(["x"]);
        assert_eq!(eligibility(None, &request), Err(SkipReason::NotFound));

        // A tiny PDF is reported as unsupported, not too small.
        let pdf = FileRecord::new("b", "b.pdf", "application/pdf", 10);
        assert_eq!(eligibility(Some(&pdf), &request), Err(SkipReason::UnsupportedType));

        assert_eq!(eligibility(Some(&image("a", 50)), &request), Err(SkipReason::TooSmall));
        assert_eq!(eligibility(Some(&image("a", 1024)), &request), Err(SkipReason::TooSmall));
        assert_eq!(eligibility(Some(&image("a", 1025)), &request), Ok(()));
    }

    #[test]
    fn status_decides_resubmission() {
        let request = BatchRequest::new(["a"]);
        let mut record = image("a", 4096);

        for (status, expected) in [
            (VectorizationStatus::NotStarted, Ok(())),
            (VectorizationStatus::Failed, Ok(())),
            (VectorizationStatus::Completed, Err(SkipReason::AlreadyProcessed)),
            (VectorizationStatus::Queued, Err(SkipReason::InFlight)),
            (VectorizationStatus::Processing, Err(SkipReason::InFlight)),
        ] {
            record.vectorization_status = status;
            assert_eq!(eligibility(Some(&record), &request), expected, "{}", status);
        }

        record.vectorization_status = VectorizationStatus::Completed;
        assert_eq!(eligibility(Some(&record), &request.clone().forced()), Ok(()));
    }

    #[test]
    fn other_users_files_look_missing() {
        let request = BatchRequest::new(["a"]).for_user("u1");
        let theirs = image("a", 4096).with_user("u2");
        let mine = image("a", 4096).with_user("u1");
        assert_eq!(eligibility(Some(&theirs), &request), Err(SkipReason::NotFound));
        assert_eq!(eligibility(Some(&mine), &request), Ok(()));
    }

    #[test]
    fn image_prefix_is_case_insensitive() {
        let record = FileRecord::new("a", "a.PNG", "Image/PNG", 4096);
        assert_eq!(eligibility(Some(&record), &BatchRequest::new(["a"])), Ok(()));
    }
}
