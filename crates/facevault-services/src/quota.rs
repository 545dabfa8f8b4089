//! Daily vectorization quota
//!
//! A user's usage is the number of their files whose current submission
//! entered `Queued` on the current UTC day.
//!
//! Usage is derived from the records, so reading it and admitting files must
//! not interleave with another submission of the same user. Callers hold a
//! [`QuotaLock`] from the usage read until their last admission.

use chrono::{DateTime, Utc};
use facevault_core::models::{FileRecord, QuotaUsage};
use facevault_db::{FileRecordStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type UserLocks = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Clone)]
pub struct QuotaService {
    store: Arc<dyn FileRecordStore>,
    daily_limit: u32,
    locks: UserLocks,
}

/// Exclusive right to spend one user's quota. Released on drop.
pub struct QuotaLock {
    user_id: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: UserLocks,
}

impl Drop for QuotaLock {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this lock still reference it: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.user_id);
        }
    }
}

impl QuotaService {
    /// `daily_limit == 0` disables the quota.
    pub fn new(store: Arc<dyn FileRecordStore>, daily_limit: u32) -> Self {
        Self {
            store,
            daily_limit,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Wait until no other submission of `user_id` is spending quota.
    pub async fn lock_user(&self, user_id: &str) -> QuotaLock {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry(user_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        QuotaLock {
            user_id: user_id.to_string(),
            lock,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    #[tracing::instrument(skip(self))]
    pub async fn usage(&self, user_id: &str) -> Result<QuotaUsage, StoreError> {
        let records = self.store.list_by_user(user_id).await?;
        Ok(self.usage_of(&records, Utc::now()))
    }

    /// Usage computed from an already loaded set of the user's records.
    pub fn usage_of(&self, records: &[FileRecord], now: DateTime<Utc>) -> QuotaUsage {
        let today = now.date_naive();
        let used = records
            .iter()
            .filter(|r| {
                r.vectorization_queued_at
                    .is_some_and(|queued_at| queued_at.date_naive() == today)
            })
            .count();
        QuotaUsage {
            used: u32::try_from(used).unwrap_or(u32::MAX),
            limit: self.daily_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use facevault_db::InMemoryFileRecordStore;

    fn queued_at(id: &str, at: DateTime<Utc>) -> FileRecord {
        let mut record = FileRecord::new(id, "x.jpg", "image/jpeg", 4096).with_user("u1");
        record.vectorization_queued_at = Some(at);
        record
    }

    #[test]
    fn counts_only_todays_submissions() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        let records = vec![
            queued_at("a", now),
            queued_at("b", Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 1).unwrap()),
            queued_at("c", Utc.with_ymd_and_hms(2026, 3, 13, 23, 59, 59).unwrap()),
            FileRecord::new("d", "d.jpg", "image/jpeg", 4096).with_user("u1"),
        ];
        let store = Arc::new(InMemoryFileRecordStore::new());
        let usage = QuotaService::new(store, 10).usage_of(&records, now);
        assert_eq!(usage, QuotaUsage { used: 2, limit: 10 });
    }

    #[tokio::test]
    async fn usage_reads_users_records() {
        let store = InMemoryFileRecordStore::with_records([
            queued_at("a", Utc::now()),
            queued_at("b", Utc::now()).with_user("u2"),
        ]);
        let service = QuotaService::new(Arc::new(store), 0);

        let usage = service.usage("u1").await.unwrap();
        assert_eq!(usage.used, 1);
        assert!(usage.is_unlimited());
    }

    #[tokio::test]
    async fn user_lock_is_exclusive_and_forgotten_when_released() {
        let service = QuotaService::new(Arc::new(InMemoryFileRecordStore::new()), 1);

        let first = service.lock_user("u1").await;
        let contender = service.clone();
        let waiting = tokio::spawn(async move { contender.lock_user("u1").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        // Other users are not blocked.
        drop(service.lock_user("u2").await);

        drop(first);
        let second = waiting.await.unwrap();
        assert_eq!(service.tracked_users(), 1);
        drop(second);
        assert_eq!(service.tracked_users(), 0);
    }
}
