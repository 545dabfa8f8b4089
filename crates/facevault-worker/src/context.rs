//! Job handler trait
//!
//! The service layer implements this trait to run detection and aggregation
//! for one job. The worker owns the surrounding state transitions, timeouts and
//! cancellation; a handler only turns a claimed file into faces or a failure.

use async_trait::async_trait;
use facevault_core::models::{FaceRecord, FailureCause, FileRecord, VectorizationJob};

/// Faces found for a job and the number of external calls it took.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput {
    pub faces: Vec<FaceRecord>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub cause: FailureCause,
    pub attempts: u32,
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process `job` for `record` (as it was when the job entered Processing)
    /// using at most `budget` external calls.
    async fn handle(
        &self,
        job: &VectorizationJob,
        record: &FileRecord,
        budget: u32,
    ) -> Result<JobOutput, JobFailure>;
}
