//! Vectorization pipeline wiring
//!
//! Builds the detector, the job handler, the dispatch queue and the services
//! on top of it from configuration.

use facevault_core::{Config, DetectionBackend, DetectionError, DetectionSettings};
use facevault_db::FileRecordStore;
use facevault_plugins::{
    ArtifactProcessorDetector, AwsRekognitionDetector, FaceDetector, RetryPolicy,
    RetryingDetector,
};
use facevault_processing::FaceAggregator;
use facevault_worker::{DispatchQueue, JobReportSender, QueueConfig};
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::BatchDispatcher;
use crate::files::FileQueryService;
use crate::quota::QuotaService;
use crate::vectorizer::FaceVectorizer;

/// Create the configured face detection backend.
pub async fn create_detector(
    settings: &DetectionSettings,
) -> Result<Arc<dyn FaceDetector>, DetectionError> {
    let timeout = Duration::from_secs(settings.attempt_timeout_secs);
    let detector: Arc<dyn FaceDetector> = match settings.backend {
        DetectionBackend::ArtifactProcessor => {
            tracing::info!(url = %settings.artifact_processor_url, "Using artifact processor face detection");
            Arc::new(ArtifactProcessorDetector::new(
                settings.artifact_processor_url.clone(),
                timeout,
            )?)
        }
        DetectionBackend::AwsRekognition => {
            tracing::info!(region = %settings.aws_region, "Using AWS Rekognition face detection");
            Arc::new(AwsRekognitionDetector::new(&settings.aws_region, timeout).await?)
        }
    };
    Ok(detector)
}

#[derive(Clone)]
pub struct VectorizationPipeline {
    pub queue: DispatchQueue,
    pub dispatcher: BatchDispatcher,
    pub files: FileQueryService,
    pub quota: QuotaService,
}

impl VectorizationPipeline {
    /// Start the dispatch queue (and its reaper) around `detector`. Must be
    /// called inside a Tokio runtime.
    pub fn start(
        store: Arc<dyn FileRecordStore>,
        detector: Arc<dyn FaceDetector>,
        config: &Config,
        report_tx: Option<JobReportSender>,
    ) -> Self {
        let handler = FaceVectorizer::new(
            RetryingDetector::new(detector, RetryPolicy::from(&config.detection)),
            FaceAggregator::new(config.dispatch.min_face_confidence),
            config.detection.requested_attributes.clone(),
        );
        let queue = DispatchQueue::start(
            store.clone(),
            Arc::new(handler),
            QueueConfig::from(&config.queue),
            report_tx,
        );
        let quota = QuotaService::new(store.clone(), config.dispatch.daily_quota);
        let dispatcher = BatchDispatcher::new(
            store.clone(),
            queue.clone(),
            quota.clone(),
            config.dispatch.clone(),
        );

        Self {
            queue,
            dispatcher,
            files: FileQueryService::new(store),
            quota,
        }
    }
}
