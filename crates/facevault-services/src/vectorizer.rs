//! Face vectorization job handler
//!
//! Runs one claimed file through the retrying detector and the aggregator.
//! Detector failures are turned into classified causes; the worker writes the
//! terminal transition.

use async_trait::async_trait;
use facevault_core::models::{FailureCause, FileRecord, VectorizationJob};
use facevault_plugins::{DetectionFailure, DetectionRequest, RetryingDetector};
use facevault_processing::FaceAggregator;
use facevault_worker::{JobFailure, JobHandler, JobOutput};

pub struct FaceVectorizer {
    detector: RetryingDetector,
    aggregator: FaceAggregator,
    requested_attributes: Vec<String>,
}

impl FaceVectorizer {
    pub fn new(
        detector: RetryingDetector,
        aggregator: FaceAggregator,
        requested_attributes: Vec<String>,
    ) -> Self {
        Self {
            detector,
            aggregator,
            requested_attributes,
        }
    }
}

#[async_trait]
impl JobHandler for FaceVectorizer {
    #[tracing::instrument(skip(self, job, record), fields(file_id = %job.file_id, attempt = job.attempt))]
    async fn handle(
        &self,
        job: &VectorizationJob,
        record: &FileRecord,
        budget: u32,
    ) -> Result<JobOutput, JobFailure> {
        let request = DetectionRequest::for_record(record, &self.requested_attributes);

        match self.detector.detect(&request, budget).await {
            Ok(outcome) => {
                let aggregated = self.aggregator.aggregate(&outcome.response.detections);
                tracing::debug!(
                    detections = outcome.response.detections.len(),
                    face_count = aggregated.face_count,
                    attempts = outcome.attempts,
                    "Detection finished"
                );
                Ok(JobOutput {
                    faces: aggregated.faces,
                    attempts: outcome.attempts,
                })
            }
            Err(failure) => Err(classify_failure(failure)),
        }
    }
}

/// Transient errors only surface once the attempt budget ran out.
fn classify_failure(failure: DetectionFailure) -> JobFailure {
    let DetectionFailure { error, attempts } = failure;
    let cause = if error.is_retryable() {
        FailureCause::DetectionExhausted {
            attempts,
            message: error.message().to_string(),
        }
    } else {
        FailureCause::Detection {
            message: error.message().to_string(),
        }
    };
    JobFailure { cause, attempts }
}
