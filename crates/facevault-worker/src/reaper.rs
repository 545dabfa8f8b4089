//! Stale job reaper
//!
//! Periodically scans for files stuck in `Queued` or `Processing` longer than
//! the staleness threshold (a crashed process, a lost channel message) and
//! re-queues them with the next attempt number. Files that have used their
//! whole attempt budget are failed with `attempts exhausted` instead.
//! Files claimed by a live local job are left alone.

use chrono::Utc;
use facevault_core::models::{FailureCause, FileRecord, VectorizationJob, VectorizationStatus};
use facevault_db::{FileRecordStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::queue::{Admission, DispatchQueue, EnqueueError};

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub stale_threshold: Duration,
    pub max_total_attempts: u32,
    /// Records examined per sweep.
    pub batch_limit: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(600),
            max_total_attempts: 5,
            batch_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub requeued: usize,
    pub exhausted: usize,
    pub skipped: usize,
}

pub struct StaleJobReaper {
    store: Arc<dyn FileRecordStore>,
    queue: DispatchQueue,
    config: ReaperConfig,
}

impl StaleJobReaper {
    pub fn new(store: Arc<dyn FileRecordStore>, queue: DispatchQueue, config: ReaperConfig) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so a restart does not
        // sweep before workers had a chance to pick up buffered jobs.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.reap_once().await {
                        Ok(summary) if summary != ReapSummary::default() => {
                            tracing::info!(
                                requeued = summary.requeued,
                                exhausted = summary.exhausted,
                                skipped = summary.skipped,
                                "Stale job sweep finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Stale job reaper failed"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        tracing::debug!("Stale job reaper stopped");
    }

    /// One sweep over stale in-flight records.
    pub async fn reap_once(&self) -> Result<ReapSummary, StoreError> {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or(chrono::Duration::MAX);
        let updated_before = Utc::now()
            .checked_sub_signed(threshold)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let stale = self
            .store
            .list_stale(
                &[VectorizationStatus::Queued, VectorizationStatus::Processing],
                updated_before,
                self.config.batch_limit,
            )
            .await?;

        let mut summary = ReapSummary::default();
        for record in stale {
            if self.queue.is_claimed(&record.id) {
                summary.skipped += 1;
                continue;
            }

            if record.attempts_in_submission() >= self.config.max_total_attempts {
                if self.fail_exhausted(&record).await? {
                    summary.exhausted += 1;
                } else {
                    summary.skipped += 1;
                }
                continue;
            }

            match self.queue.admit(&record, Admission::Requeue).await {
                Ok(_) => summary.requeued += 1,
                Err(EnqueueError::AlreadyClaimed(_)) | Err(EnqueueError::Conflict(_)) => {
                    summary.skipped += 1;
                }
                Err(EnqueueError::Overloaded) | Err(EnqueueError::ShuttingDown) => {
                    tracing::warn!(file_id = %record.id, "Queue unavailable, ending sweep early");
                    break;
                }
                Err(EnqueueError::Store(e)) => return Err(e),
            }
        }

        Ok(summary)
    }

    async fn fail_exhausted(&self, record: &FileRecord) -> Result<bool, StoreError> {
        let Some(_claim) = self.queue.try_claim(&record.id) else {
            return Ok(false);
        };
        let job = VectorizationJob::requeue(
            record.id.clone(),
            record.vectorization_batch_id,
            record.vectorization_attempt,
            record.vectorization_first_attempt,
        );
        let cause = FailureCause::AttemptsExhausted {
            attempts: record.attempts_in_submission(),
        };
        let outcome = self
            .queue
            .state_machine()
            .mark_failed(&job, record.vectorization_status, &cause, None)
            .await?;
        Ok(outcome.is_applied())
    }
}
