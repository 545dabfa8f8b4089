//! Per-file claim table
//!
//! A claim is exclusive ownership of one file id by one live job. It is taken
//! at admission and released when the [`ClaimGuard`] is dropped, which happens
//! after the job's terminal transition (or when admission is abandoned).

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct ClaimTable {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl ClaimTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set is always left consistent, so a poisoned lock is still usable.
        self.claimed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `file_id`, or None when another job holds it.
    pub fn try_claim(&self, file_id: &str) -> Option<ClaimGuard> {
        if self.lock().insert(file_id.to_string()) {
            Some(ClaimGuard {
                table: self.clone(),
                file_id: file_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn is_claimed(&self, file_id: &str) -> bool {
        self.lock().contains(file_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Releases the claim on drop.
pub struct ClaimGuard {
    table: ClaimTable,
    file_id: String,
}

impl ClaimGuard {
    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

impl std::fmt::Debug for ClaimGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("file_id", &self.file_id)
            .finish()
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.table.lock().remove(&self.file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let table = ClaimTable::new();
        let guard = table.try_claim("a").unwrap();
        assert!(table.try_claim("a").is_none());
        assert!(table.is_claimed("a"));
        assert!(table.try_claim("b").is_some());

        drop(guard);
        assert!(!table.is_claimed("a"));
        assert!(table.try_claim("a").is_some());
    }

    #[test]
    fn concurrent_claims_have_one_winner() {
        let table = ClaimTable::new();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || table.try_claim("shared").map(std::mem::forget).is_some())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
