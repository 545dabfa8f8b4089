use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::face::FaceRecord;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VectorizationStatus {
    #[default]
    NotStarted,
    Queued,
    Processing,
    Completed,
    Failed,
}

impl VectorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VectorizationStatus::NotStarted => "not_started",
            VectorizationStatus::Queued => "queued",
            VectorizationStatus::Processing => "processing",
            VectorizationStatus::Completed => "completed",
            VectorizationStatus::Failed => "failed",
        }
    }

    /// Queued or Processing: a job owns the file.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            VectorizationStatus::Queued | VectorizationStatus::Processing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VectorizationStatus::Completed | VectorizationStatus::Failed
        )
    }

    /// Legal edges of the per-file lifecycle.
    ///
    /// `Queued -> Queued` and `Processing -> Queued` are sweep re-queues.
    /// `Queued -> Failed` is only used for cancellation and exhausted attempt
    /// budgets; a detection result always goes through `Processing`.
    pub fn can_transition_to(&self, next: VectorizationStatus) -> bool {
        use VectorizationStatus::*;
        matches!(
            (self, next),
            (NotStarted, Queued)
                | (Failed, Queued)
                | (Completed, Queued)
                | (Queued, Queued)
                | (Processing, Queued)
                | (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl Display for VectorizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VectorizationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(VectorizationStatus::NotStarted),
            "queued" => Ok(VectorizationStatus::Queued),
            "processing" => Ok(VectorizationStatus::Processing),
            "completed" => Ok(VectorizationStatus::Completed),
            "failed" => Ok(VectorizationStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid vectorization status: {}", s)),
        }
    }
}

/// Per-file metadata as held by the file record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub download_url: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub vectorization_status: VectorizationStatus,
    pub vectorization_completed_at: Option<DateTime<Utc>>,
    pub vectorization_error: Option<String>,
    pub face_count: u32,
    pub extracted_faces: Vec<FaceRecord>,
    pub has_extracted_faces: bool,
    /// Attempt number of the current or last job. 0 before the first job.
    pub vectorization_attempt: u32,
    /// Attempt number at which the current submission started.
    pub vectorization_first_attempt: u32,
    /// Batch of the current submission. Survives sweep re-queues.
    pub vectorization_batch_id: Option<Uuid>,
    pub vectorization_queued_at: Option<DateTime<Utc>>,
    pub vectorization_updated_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    /// A freshly uploaded file that has never been vectorized.
    pub fn new(
        id: impl Into<String>,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: None,
            file_name: file_name.into(),
            file_type: file_type.into(),
            file_size,
            download_url: None,
            uploaded_at: Utc::now(),
            vectorization_status: VectorizationStatus::NotStarted,
            vectorization_completed_at: None,
            vectorization_error: None,
            face_count: 0,
            extracted_faces: Vec::new(),
            has_extracted_faces: false,
            vectorization_attempt: 0,
            vectorization_first_attempt: 0,
            vectorization_batch_id: None,
            vectorization_queued_at: None,
            vectorization_updated_at: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_download_url(mut self, url: impl Into<String>) -> Self {
        self.download_url = Some(url.into());
        self
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    /// Attempts consumed by the current submission, including the current one.
    pub fn attempts_in_submission(&self) -> u32 {
        self.vectorization_attempt
            .saturating_sub(self.vectorization_first_attempt)
            + 1
    }

    /// Where the detector should fetch the image from.
    pub fn image_reference(&self) -> &str {
        self.download_url.as_deref().unwrap_or(&self.id)
    }
}

/// Precondition of a guarded status write. With `attempt` set, the stored
/// attempt must match as well, so a worker holding an older generation of a
/// re-queued job cannot overwrite the newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusGuard {
    pub status: VectorizationStatus,
    pub attempt: Option<u32>,
}

impl StatusGuard {
    pub fn status(status: VectorizationStatus) -> Self {
        Self {
            status,
            attempt: None,
        }
    }

    pub fn at_attempt(status: VectorizationStatus, attempt: u32) -> Self {
        Self {
            status,
            attempt: Some(attempt),
        }
    }

    pub fn matches(&self, record: &FileRecord) -> bool {
        record.vectorization_status == self.status
            && self
                .attempt
                .map_or(true, |a| a == record.vectorization_attempt)
    }
}

/// Field changes that accompany a status transition.
///
/// Constructed only through the named constructors, which keep the record
/// invariants: `vectorizationCompletedAt` is set iff the new status is
/// terminal, `vectorizationError` iff it is Failed, and face results are
/// replaced only on Completed (a failure keeps the last good result).
#[derive(Debug, Clone, PartialEq)]
pub struct StatusTransition {
    pub to: VectorizationStatus,
    pub at: DateTime<Utc>,
    pub attempt: Option<u32>,
    pub first_attempt: Option<u32>,
    pub batch_id: Option<Uuid>,
    pub queued_at: Option<DateTime<Utc>>,
    pub faces: Option<Vec<FaceRecord>>,
    pub error: Option<String>,
}

impl StatusTransition {
    fn base(to: VectorizationStatus, at: DateTime<Utc>) -> Self {
        Self {
            to,
            at,
            attempt: None,
            first_attempt: None,
            batch_id: None,
            queued_at: None,
            faces: None,
            error: None,
        }
    }

    /// New submission of `batch_id`: starts a fresh attempt budget at `attempt`.
    pub fn queued(attempt: u32, batch_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            attempt: Some(attempt),
            first_attempt: Some(attempt),
            batch_id: Some(batch_id),
            queued_at: Some(at),
            ..Self::base(VectorizationStatus::Queued, at)
        }
    }

    /// Sweep re-queue: same submission and batch, next attempt.
    pub fn requeued(attempt: u32, at: DateTime<Utc>) -> Self {
        Self {
            attempt: Some(attempt),
            ..Self::base(VectorizationStatus::Queued, at)
        }
    }

    pub fn processing(at: DateTime<Utc>) -> Self {
        Self::base(VectorizationStatus::Processing, at)
    }

    /// `attempt` is the attempt number that produced the result.
    pub fn completed(faces: Vec<FaceRecord>, attempt: u32, at: DateTime<Utc>) -> Self {
        Self {
            attempt: Some(attempt),
            faces: Some(faces),
            ..Self::base(VectorizationStatus::Completed, at)
        }
    }

    pub fn failed(cause: impl Into<String>, attempt: Option<u32>, at: DateTime<Utc>) -> Self {
        Self {
            attempt,
            error: Some(cause.into()),
            ..Self::base(VectorizationStatus::Failed, at)
        }
    }

    /// The record as it looks after this transition.
    pub fn apply_to(&self, record: &FileRecord) -> FileRecord {
        let mut next = record.clone();
        next.vectorization_status = self.to;
        next.vectorization_updated_at = Some(self.at);
        if let Some(attempt) = self.attempt {
            next.vectorization_attempt = attempt;
        }
        if let Some(first) = self.first_attempt {
            next.vectorization_first_attempt = first;
        }
        if let Some(batch_id) = self.batch_id {
            next.vectorization_batch_id = Some(batch_id);
        }
        if let Some(queued_at) = self.queued_at {
            next.vectorization_queued_at = Some(queued_at);
        }

        match self.to {
            VectorizationStatus::NotStarted
            | VectorizationStatus::Queued
            | VectorizationStatus::Processing => {
                next.vectorization_completed_at = None;
                next.vectorization_error = None;
            }
            VectorizationStatus::Completed => {
                let faces = self.faces.clone().unwrap_or_default();
                next.vectorization_completed_at = Some(self.at);
                next.vectorization_error = None;
                next.face_count = faces.len() as u32;
                next.has_extracted_faces = !faces.is_empty();
                next.extracted_faces = faces;
            }
            VectorizationStatus::Failed => {
                next.vectorization_completed_at = Some(self.at);
                next.vectorization_error = self.error.clone();
            }
        }
        next
    }
}
