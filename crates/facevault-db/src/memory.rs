//! In-memory file record store
//!
//! Backs `STORE_BACKEND=memory` and the test suites. Every operation holds the
//! map lock for its whole read-modify-write, which gives the same per-record
//! atomicity the PostgreSQL guarded UPDATE provides.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use facevault_core::models::{FileRecord, StatusGuard, StatusTransition, VectorizationStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{check_transition, CasOutcome, FileRecordStore};

#[derive(Clone)]
pub struct InMemoryFileRecordStore {
    records: Arc<RwLock<HashMap<String, FileRecord>>>,
    unavailable: Arc<AtomicBool>,
    /// Number of guarded writes that may still succeed before the store
    /// reports itself unavailable. `usize::MAX` when not armed.
    writes_before_outage: Arc<AtomicUsize>,
}

impl InMemoryFileRecordStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
            writes_before_outage: Arc::new(AtomicUsize::new(usize::MAX)),
        }
    }

    /// Store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let map = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        Self {
            records: Arc::new(RwLock::new(map)),
            ..Self::new()
        }
    }

    /// Simulate an outage: every operation fails with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Let `n` more guarded writes through, then fail every operation.
    pub fn fail_after_writes(&self, n: usize) {
        self.writes_before_outage.store(n, Ordering::SeqCst);
    }

    /// Overwrite a record without any guard. Test and seeding helper.
    pub async fn put(&self, record: FileRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn consume_write(&self) -> Result<(), StoreError> {
        let remaining = self.writes_before_outage.load(Ordering::SeqCst);
        if remaining == usize::MAX {
            return Ok(());
        }
        if remaining == 0 {
            self.unavailable.store(true, Ordering::SeqCst);
            return self.check_available();
        }
        self.writes_before_outage
            .store(remaining - 1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for InMemoryFileRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileRecordStore for InMemoryFileRecordStore {
    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.read().await.get(file_id).cloned())
    }

    async fn compare_and_set_status(
        &self,
        file_id: &str,
        guard: StatusGuard,
        transition: StatusTransition,
    ) -> Result<CasOutcome, StoreError> {
        check_transition(&guard, &transition)?;
        self.check_available()?;
        self.consume_write()?;

        let mut records = self.records.write().await;
        let Some(current) = records.get(file_id) else {
            return Ok(CasOutcome::Conflict(None));
        };
        if !guard.matches(current) {
            return Ok(CasOutcome::Conflict(Some(current.clone())));
        }

        let next = transition.apply_to(current);
        records.insert(file_id.to_string(), next.clone());
        Ok(CasOutcome::Applied(next))
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        self.check_available()?;
        let mut records: Vec<FileRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_owned_by(user_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn list_stale(
        &self,
        statuses: &[VectorizationStatus],
        updated_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FileRecord>, StoreError> {
        self.check_available()?;
        let mut stale: Vec<FileRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| statuses.contains(&r.vectorization_status))
            .filter(|r| {
                r.vectorization_updated_at
                    .is_some_and(|updated| updated < updated_before)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.vectorization_updated_at);
        stale.truncate(limit);
        Ok(stale)
    }

    async fn insert(&self, record: FileRecord) -> Result<(), StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn image(id: &str) -> FileRecord {
        FileRecord::new(id, format!("{}.jpg", id), "image/jpeg", 4096)
    }

    #[tokio::test]
    async fn cas_applies_when_guard_matches() {
        let store = InMemoryFileRecordStore::with_records([image("a")]);
        let outcome = store
            .compare_and_set_status(
                "a",
                StatusGuard::status(VectorizationStatus::NotStarted),
                StatusTransition::queued(1, Uuid::new_v4(), Utc::now()),
            )
            .await
            .unwrap();

        let CasOutcome::Applied(record) = outcome else {
            panic!("expected the guarded write to apply");
        };
        assert_eq!(record.vectorization_status, VectorizationStatus::Queued);
        assert_eq!(
            store.get("a").await.unwrap().unwrap().vectorization_status,
            VectorizationStatus::Queued
        );
    }

    #[tokio::test]
    async fn cas_reports_current_record_on_conflict() {
        let store = InMemoryFileRecordStore::with_records([image("a")]);
        let outcome = store
            .compare_and_set_status(
                "a",
                StatusGuard::status(VectorizationStatus::Queued),
                StatusTransition::processing(Utc::now()),
            )
            .await
            .unwrap();

        match outcome {
            CasOutcome::Conflict(Some(current)) => {
                assert_eq!(current.vectorization_status, VectorizationStatus::NotStarted)
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cas_on_missing_record_is_conflict_without_record() {
        let store = InMemoryFileRecordStore::new();
        let outcome = store
            .compare_and_set_status(
                "ghost",
                StatusGuard::status(VectorizationStatus::NotStarted),
                StatusTransition::queued(1, Uuid::new_v4(), Utc::now()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Conflict(None));
    }

    #[tokio::test]
    async fn stale_attempt_guard_loses() {
        let mut record = image("a");
        record.vectorization_status = VectorizationStatus::Processing;
        record.vectorization_attempt = 3;
        let store = InMemoryFileRecordStore::with_records([record]);

        let outcome = store
            .compare_and_set_status(
                "a",
                StatusGuard::at_attempt(VectorizationStatus::Processing, 2),
                StatusTransition::failed("cancelled", None, Utc::now()),
            )
            .await
            .unwrap();
        assert!(!outcome.is_applied());
    }

    #[tokio::test]
    async fn illegal_transition_is_rejected() {
        let store = InMemoryFileRecordStore::with_records([image("a")]);
        let err = store
            .compare_and_set_status(
                "a",
                StatusGuard::status(VectorizationStatus::Queued),
                StatusTransition::completed(Vec::new(), 1, Utc::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn list_stale_filters_by_status_and_age() {
        let now = Utc::now();
        let mut old_queued = image("old");
        old_queued.vectorization_status = VectorizationStatus::Queued;
        old_queued.vectorization_updated_at = Some(now - Duration::minutes(30));
        let mut fresh = image("fresh");
        fresh.vectorization_status = VectorizationStatus::Processing;
        fresh.vectorization_updated_at = Some(now);
        let mut done = image("done");
        done.vectorization_status = VectorizationStatus::Completed;
        done.vectorization_updated_at = Some(now - Duration::minutes(30));

        let store = InMemoryFileRecordStore::with_records([old_queued, fresh, done]);
        let stale = store
            .list_stale(
                &[VectorizationStatus::Queued, VectorizationStatus::Processing],
                now - Duration::minutes(10),
                10,
            )
            .await
            .unwrap();
        let ids: Vec<_> = stale.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[tokio::test]
    async fn list_by_user_only_returns_owned_records() {
        let store = InMemoryFileRecordStore::with_records([
            image("a").with_user("u1"),
            image("b").with_user("u2"),
            image("c"),
        ]);
        let records = store.list_by_user("u1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "a");
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = InMemoryFileRecordStore::new();
        store.insert(image("a")).await.unwrap();
        assert!(matches!(
            store.insert(image("a")).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn outage_fails_every_operation() {
        let store = InMemoryFileRecordStore::with_records([image("a")]);
        store.set_unavailable(true);
        assert!(store.get("a").await.unwrap_err().is_unavailable());
        assert!(store.ping().await.is_err());
        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    async fn armed_outage_trips_after_n_writes() {
        let store = InMemoryFileRecordStore::with_records([image("a"), image("b")]);
        store.fail_after_writes(1);
        let guard = StatusGuard::status(VectorizationStatus::NotStarted);

        assert!(store
            .compare_and_set_status("a", guard, StatusTransition::queued(1, Uuid::new_v4(), Utc::now()))
            .await
            .is_ok());
        let err = store
            .compare_and_set_status("b", guard, StatusTransition::queued(1, Uuid::new_v4(), Utc::now()))
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }
}
