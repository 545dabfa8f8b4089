use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

use super::file_record::VectorizationStatus;

/// Unit of work owned by the dispatch queue from admission until the file's
/// terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorizationJob {
    pub file_id: String,
    /// Batch of the submission. Sweep re-queues keep it.
    pub batch_id: Option<Uuid>,
    pub attempt: u32,
    pub first_attempt: u32,
    pub submitted_at: DateTime<Utc>,
    pub state: VectorizationStatus,
}

impl VectorizationJob {
    /// Job for a new submission of `file_id`.
    pub fn new(file_id: impl Into<String>, batch_id: Option<Uuid>, attempt: u32) -> Self {
        Self {
            file_id: file_id.into(),
            batch_id,
            attempt,
            first_attempt: attempt,
            submitted_at: Utc::now(),
            state: VectorizationStatus::Queued,
        }
    }

    /// Job for a re-queue of an existing submission.
    pub fn requeue(
        file_id: impl Into<String>,
        batch_id: Option<Uuid>,
        attempt: u32,
        first_attempt: u32,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            batch_id,
            attempt,
            first_attempt,
            submitted_at: Utc::now(),
            state: VectorizationStatus::Queued,
        }
    }

    /// External call attempts still available to this submission.
    pub fn remaining_budget(&self, max_total_attempts: u32) -> u32 {
        let used_before = self.attempt.saturating_sub(self.first_attempt);
        max_total_attempts.saturating_sub(used_before)
    }
}

/// Cause recorded in `vectorizationError` when a job fails. Rendered as a
/// short classified string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Fatal detection error, not retried.
    Detection { message: String },
    /// Transient detection errors until the retry budget ran out.
    DetectionExhausted { attempts: u32, message: String },
    Cancelled,
    TimedOut { secs: u64 },
    AttemptsExhausted { attempts: u32 },
    RecordDisappeared,
}

impl Display for FailureCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FailureCause::Detection { message } => write!(f, "detection failed: {}", message),
            FailureCause::DetectionExhausted { attempts, message } => {
                write!(f, "detection failed after {} attempts: {}", attempts, message)
            }
            FailureCause::Cancelled => write!(f, "cancelled"),
            FailureCause::TimedOut { secs } => write!(f, "timed out after {}s", secs),
            FailureCause::AttemptsExhausted { attempts } => {
                write!(f, "attempts exhausted after {} attempts", attempts)
            }
            FailureCause::RecordDisappeared => {
                write!(f, "file record disappeared during processing")
            }
        }
    }
}
