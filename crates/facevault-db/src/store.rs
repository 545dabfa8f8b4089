use async_trait::async_trait;
use chrono::{DateTime, Utc};
use facevault_core::models::{FileRecord, StatusGuard, StatusTransition, VectorizationStatus};

use crate::error::StoreError;

/// Result of a guarded status write.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome {
    /// The guard matched; carries the record as written.
    Applied(FileRecord),
    /// The guard did not match; carries the record as currently stored,
    /// or None when it no longer exists.
    Conflict(Option<FileRecord>),
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied(_))
    }
}

/// Persistence interface for per-file vectorization state.
#[async_trait]
pub trait FileRecordStore: Send + Sync {
    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError>;

    /// Apply `transition` iff the stored record matches `guard`.
    ///
    /// Fails with `InvalidTransition` without touching the store when
    /// `guard.status -> transition.to` is not a lifecycle edge.
    async fn compare_and_set_status(
        &self,
        file_id: &str,
        guard: StatusGuard,
        transition: StatusTransition,
    ) -> Result<CasOutcome, StoreError>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<FileRecord>, StoreError>;

    /// Records in one of `statuses` whose last transition is older than
    /// `updated_before`, oldest first.
    async fn list_stale(
        &self,
        statuses: &[VectorizationStatus],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FileRecord>, StoreError>;

    async fn insert(&self, record: FileRecord) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub(crate) fn check_transition(
    guard: &StatusGuard,
    transition: &StatusTransition,
) -> Result<(), StoreError> {
    if guard.status.can_transition_to(transition.to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            from: guard.status,
            to: transition.to,
        })
    }
}
