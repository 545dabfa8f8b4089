//! Dispatch queue: admission, bounded worker pool, cancellation and drain.
//!
//! A job is owned by the queue from admission until its terminal transition:
//! it carries the file's claim and its cancellation token through the channel
//! and into the worker, and both are released only when the worker is done.
//!
//! Shutdown: [`DispatchQueue::drain`] stops admissions, lets buffered and
//! in-flight jobs finish and waits for them. [`DispatchQueue::cancel_all`]
//! aborts in-flight calls and fails every remaining job with cause `cancelled`.

use facevault_core::models::{
    FailureCause, FileRecord, VectorizationJob, VectorizationStatus,
};
use facevault_core::QueueSettings;
use facevault_db::{CasOutcome, FileRecordStore, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::claims::{ClaimGuard, ClaimTable};
use crate::context::{JobFailure, JobHandler, JobOutput};
use crate::reaper::{ReaperConfig, StaleJobReaper};
use crate::state_machine::FileStateMachine;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_workers: usize,
    /// Jobs admitted but not yet picked up by a worker.
    pub max_queue_depth: usize,
    /// Maximum time a job may hold a worker, from `Processing` to its
    /// terminal transition. Time spent waiting for a worker does not count.
    pub job_lifetime: Duration,
    pub max_total_attempts: u32,
    pub stale_threshold: Duration,
    /// 0 disables the stale job reaper.
    pub reap_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_queue_depth: 1000,
            job_lifetime: Duration::from_secs(300),
            max_total_attempts: 5,
            stale_threshold: Duration::from_secs(600),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_workers: settings.max_workers.max(1),
            max_queue_depth: settings.max_queue_depth.max(1),
            job_lifetime: Duration::from_secs(settings.job_timeout_secs),
            max_total_attempts: settings.max_total_attempts.max(1),
            stale_threshold: Duration::from_secs(settings.stale_threshold_secs),
            reap_interval: Duration::from_secs(settings.reap_interval_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("file {0} is already owned by a live job")]
    AlreadyClaimed(String),

    #[error("dispatch queue is full")]
    Overloaded,

    #[error("dispatch queue is not accepting jobs")]
    ShuttingDown,

    /// The queued write lost its guard. Carries the record as now stored.
    #[error("file record changed concurrently")]
    Conflict(Option<Box<FileRecord>>),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a job enters the queue.
#[derive(Debug, Clone, Copy)]
pub enum Admission {
    /// New submission as part of a batch.
    New { batch_id: Uuid },
    /// Sweep re-queue of a presumed-lost job.
    Requeue,
}

/// Terminal outcome of one job, as observed by the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub file_id: String,
    pub batch_id: Option<Uuid>,
    /// Attempt the job was admitted with.
    pub attempt: u32,
    /// Terminal status written, or None when the worker lost the write.
    pub status: Option<VectorizationStatus>,
    pub error: Option<String>,
}

/// Optional sender notified whenever a job finishes.
pub type JobReportSender = mpsc::Sender<JobReport>;

struct QueuedJob {
    job: VectorizationJob,
    claim: ClaimGuard,
    cancel: CancellationToken,
}

struct BatchEntry {
    token: CancellationToken,
    live: usize,
}

struct QueueInner {
    tx: mpsc::Sender<QueuedJob>,
    claims: ClaimTable,
    state_machine: FileStateMachine,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    batches: Mutex<HashMap<Uuid, BatchEntry>>,
    /// Parent of every job token; cancelled by `cancel_all`.
    root: CancellationToken,
    /// Cancelled when admissions stop.
    shutdown: CancellationToken,
    accepting: AtomicBool,
    tracker: TaskTracker,
    report_tx: Option<JobReportSender>,
}

#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

impl DispatchQueue {
    /// Create the queue and spawn its worker pool (and the stale job reaper
    /// when `reap_interval` is non-zero). Must be called inside a Tokio runtime.
    pub fn start(
        store: Arc<dyn FileRecordStore>,
        handler: Arc<dyn JobHandler>,
        config: QueueConfig,
        report_tx: Option<JobReportSender>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.max_queue_depth.max(1));

        let queue = Self {
            inner: Arc::new(QueueInner {
                tx,
                claims: ClaimTable::new(),
                state_machine: FileStateMachine::new(store.clone()),
                handler,
                config: config.clone(),
                batches: Mutex::new(HashMap::new()),
                root: CancellationToken::new(),
                shutdown: CancellationToken::new(),
                accepting: AtomicBool::new(true),
                tracker: TaskTracker::new(),
                report_tx,
            }),
        };

        let pool = queue.clone();
        queue.inner.tracker.spawn(async move {
            pool.worker_pool(rx).await;
        });

        if !config.reap_interval.is_zero() {
            let reaper = StaleJobReaper::new(
                store,
                queue.clone(),
                ReaperConfig {
                    interval: config.reap_interval,
                    stale_threshold: config.stale_threshold,
                    max_total_attempts: config.max_total_attempts,
                    ..ReaperConfig::default()
                },
            );
            let shutdown = queue.inner.shutdown.clone();
            queue.inner.tracker.spawn(reaper.run(shutdown));
        }

        queue
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn is_claimed(&self, file_id: &str) -> bool {
        self.inner.claims.is_claimed(file_id)
    }

    pub(crate) fn try_claim(&self, file_id: &str) -> Option<ClaimGuard> {
        self.inner.claims.try_claim(file_id)
    }

    pub(crate) fn state_machine(&self) -> &FileStateMachine {
        &self.inner.state_machine
    }

    /// Files currently owned by a live job.
    pub fn live_jobs(&self) -> usize {
        self.inner.claims.len()
    }

    fn batches(&self) -> MutexGuard<'_, HashMap<Uuid, BatchEntry>> {
        self.inner
            .batches
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit `record` (as read by the caller) into the queue.
    ///
    /// Order: claim the file, reserve a queue slot, write the `Queued`
    /// transition, send the job. Any failure before the send releases the
    /// claim and the slot; a lost guard on the `Queued` write is returned as
    /// `Conflict` with the current record.
    #[tracing::instrument(skip(self, record), fields(file_id = %record.id))]
    pub async fn admit(
        &self,
        record: &FileRecord,
        admission: Admission,
    ) -> Result<VectorizationJob, EnqueueError> {
        if !self.is_accepting() {
            return Err(EnqueueError::ShuttingDown);
        }

        let claim = self
            .inner
            .claims
            .try_claim(&record.id)
            .ok_or_else(|| EnqueueError::AlreadyClaimed(record.id.clone()))?;

        let permit = match self.inner.tx.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) => {
                tracing::warn!(
                    max_queue_depth = self.inner.config.max_queue_depth,
                    "Dispatch queue full, rejecting job"
                );
                return Err(EnqueueError::Overloaded);
            }
            Err(TrySendError::Closed(())) => return Err(EnqueueError::ShuttingDown),
        };

        let outcome = match admission {
            Admission::New { batch_id } => {
                self.inner.state_machine.mark_queued(record, batch_id).await?
            }
            Admission::Requeue => self.inner.state_machine.mark_requeued(record).await?,
        };
        let queued = match outcome {
            CasOutcome::Applied(queued) => queued,
            CasOutcome::Conflict(current) => {
                return Err(EnqueueError::Conflict(current.map(Box::new)))
            }
        };

        let job = match admission {
            Admission::New { batch_id } => VectorizationJob::new(
                queued.id.clone(),
                Some(batch_id),
                queued.vectorization_attempt,
            ),
            Admission::Requeue => VectorizationJob::requeue(
                queued.id.clone(),
                queued.vectorization_batch_id,
                queued.vectorization_attempt,
                queued.vectorization_first_attempt,
            ),
        };

        let cancel = match job.batch_id {
            Some(batch_id) => {
                let mut batches = self.batches();
                let entry = batches.entry(batch_id).or_insert_with(|| BatchEntry {
                    token: self.inner.root.child_token(),
                    live: 0,
                });
                entry.live += 1;
                entry.token.clone()
            }
            None => self.inner.root.child_token(),
        };

        tracing::debug!(attempt = job.attempt, batch_id = ?job.batch_id, "Job admitted");
        permit.send(QueuedJob {
            job: job.clone(),
            claim,
            cancel,
        });
        Ok(job)
    }

    /// Cancel every live job of `batch_id`. Returns false when the batch has
    /// no live jobs (unknown, or already finished).
    pub fn cancel_batch(&self, batch_id: Uuid) -> bool {
        match self.batches().get(&batch_id) {
            Some(entry) => {
                tracing::info!(batch_id = %batch_id, live = entry.live, "Cancelling batch");
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop admissions and abort every queued and in-flight job; each ends
    /// `Failed("cancelled")`. Call [`DispatchQueue::wait`] to await them.
    pub fn cancel_all(&self) {
        tracing::warn!(live_jobs = self.live_jobs(), "Cancelling all vectorization jobs");
        self.stop_accepting();
        self.inner.root.cancel();
    }

    fn stop_accepting(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
    }

    /// Graceful drain: no new admissions, buffered and in-flight jobs run to
    /// completion, then the pool and the reaper exit.
    pub async fn drain(&self) {
        tracing::info!(live_jobs = self.live_jobs(), "Draining dispatch queue");
        self.stop_accepting();
        self.wait().await;
        tracing::info!("Dispatch queue drained");
    }

    /// Drain, falling back to `cancel_all` when jobs are still running after
    /// `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.stop_accepting();
        if tokio::time::timeout(grace, self.wait()).await.is_err() {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Drain grace period elapsed, cancelling remaining jobs"
            );
            self.cancel_all();
            self.wait().await;
        }
    }

    /// Wait for the pool, the reaper and every job task to exit. Only returns
    /// after admissions were stopped.
    pub async fn wait(&self) {
        self.inner.tracker.wait().await;
    }

    async fn worker_pool(self, mut rx: mpsc::Receiver<QueuedJob>) {
        tracing::info!(
            max_workers = self.inner.config.max_workers,
            max_queue_depth = self.inner.config.max_queue_depth,
            "Dispatch queue worker pool started"
        );
        let semaphore = Arc::new(Semaphore::new(self.inner.config.max_workers.max(1)));
        let mut closed = false;

        loop {
            let queued = tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled(), if !closed => {
                    // Buffered jobs are still delivered after close.
                    rx.close();
                    closed = true;
                    continue;
                }
                queued = rx.recv() => match queued {
                    Some(queued) => queued,
                    None => break,
                },
            };

            if queued.cancel.is_cancelled() {
                let queue = self.clone();
                self.inner
                    .tracker
                    .spawn(async move { queue.run_job(queued, None).await });
                continue;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                // Do not hold a cancelled job hostage behind busy workers.
                _ = queued.cancel.cancelled() => None,
            };

            let queue = self.clone();
            self.inner
                .tracker
                .spawn(async move { queue.run_job(queued, permit).await });
        }

        tracing::info!("Dispatch queue worker pool stopped");
    }

    #[tracing::instrument(skip_all, fields(file_id = %queued.job.file_id, attempt = queued.job.attempt))]
    async fn run_job(self, queued: QueuedJob, permit: Option<OwnedSemaphorePermit>) {
        let QueuedJob {
            mut job,
            claim,
            cancel,
        } = queued;
        let _permit = permit;

        let report = self.drive(&mut job, &cancel).await;

        // Terminal: release the claim before announcing the outcome.
        drop(claim);
        self.finish_batch(job.batch_id);
        if let Some(tx) = &self.inner.report_tx {
            if tx.try_send(report).is_err() {
                tracing::debug!("Job report channel full or closed, report dropped");
            }
        }
    }

    async fn drive(&self, job: &mut VectorizationJob, cancel: &CancellationToken) -> JobReport {
        let sm = &self.inner.state_machine;
        let lifetime = self.inner.config.job_lifetime;

        // Cancelled before a worker picked it up.
        if cancel.is_cancelled() {
            let cause = FailureCause::Cancelled;
            let result = sm
                .mark_failed(job, VectorizationStatus::Queued, &cause, None)
                .await;
            return self.report(job, result, &cause.to_string()).await;
        }

        let record = match sm.mark_processing(job).await {
            Ok(CasOutcome::Applied(record)) => record,
            Ok(CasOutcome::Conflict(current)) => {
                let cause = if current.is_none() {
                    FailureCause::RecordDisappeared.to_string()
                } else {
                    "superseded".to_string()
                };
                return JobReport {
                    file_id: job.file_id.clone(),
                    batch_id: job.batch_id,
                    attempt: job.attempt,
                    status: None,
                    error: Some(cause),
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to mark job processing, leaving it to the reaper");
                return JobReport {
                    file_id: job.file_id.clone(),
                    batch_id: job.batch_id,
                    attempt: job.attempt,
                    status: None,
                    error: Some(e.to_string()),
                };
            }
        };
        job.state = VectorizationStatus::Processing;

        let budget = job.remaining_budget(self.inner.config.max_total_attempts);
        let handler = self.inner.handler.clone();

        let outcome: Result<JobOutput, JobFailure> = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(JobFailure {
                cause: FailureCause::Cancelled,
                attempts: 0,
            }),
            result = tokio::time::timeout(lifetime, handler.handle(job, &record, budget)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => Err(JobFailure {
                        cause: FailureCause::TimedOut { secs: lifetime.as_secs() },
                        attempts: 0,
                    }),
                }
            }
        };

        // Attempt number of the last external call made for this job.
        let admitted_attempt = job.attempt;
        let attempt_of = move |attempts: u32| admitted_attempt + attempts.saturating_sub(1);

        match outcome {
            Ok(output) => {
                let attempt = attempt_of(output.attempts);
                let result = sm.mark_completed(job, output.faces, attempt).await;
                self.report(job, result, "").await
            }
            Err(failure) => {
                let attempt = (failure.attempts > 0).then(|| attempt_of(failure.attempts));
                let cause = failure.cause.to_string();
                let result = sm
                    .mark_failed(job, VectorizationStatus::Processing, &failure.cause, attempt)
                    .await;
                self.report(job, result, &cause).await
            }
        }
    }

    /// Turn the terminal write into a report. A lost write re-reads the
    /// current record and reports nothing as written.
    async fn report(
        &self,
        job: &mut VectorizationJob,
        result: Result<CasOutcome, StoreError>,
        cause: &str,
    ) -> JobReport {
        let mut report = JobReport {
            file_id: job.file_id.clone(),
            batch_id: job.batch_id,
            attempt: job.attempt,
            status: None,
            error: (!cause.is_empty()).then(|| cause.to_string()),
        };

        match result {
            Ok(CasOutcome::Applied(record)) => {
                job.state = record.vectorization_status;
                report.status = Some(record.vectorization_status);
                report.error = record.vectorization_error;
            }
            Ok(CasOutcome::Conflict(_)) => {
                match self.inner.state_machine.store().get(&job.file_id).await {
                    Ok(Some(current)) => tracing::debug!(
                        status = %current.vectorization_status,
                        attempt = current.vectorization_attempt,
                        "Result discarded, file moved on"
                    ),
                    Ok(None) => {
                        report.error = Some(FailureCause::RecordDisappeared.to_string());
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to re-read file record"),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Terminal status write failed, leaving it to the reaper");
            }
        }
        report
    }

    fn finish_batch(&self, batch_id: Option<Uuid>) {
        let Some(batch_id) = batch_id else {
            return;
        };
        let mut batches = self.batches();
        if let Some(entry) = batches.get_mut(&batch_id) {
            entry.live = entry.live.saturating_sub(1);
            if entry.live == 0 {
                batches.remove(&batch_id);
            }
        }
    }
}
