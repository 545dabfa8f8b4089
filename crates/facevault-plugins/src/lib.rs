//! Face detection client
//!
//! A `FaceDetector` wraps one external face-detection call: request
//! construction, response parsing and transient/fatal error classification.
//! `RetryingDetector` adds the retry policy and per-attempt timeouts on top of
//! any backend.

pub mod detector;
pub mod retry;

#[cfg(feature = "artifact-processor")]
pub mod artifact_processor;
#[cfg(feature = "aws-rekognition")]
pub mod aws_rekognition;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use detector::{
    sanitize_detections, DetectionRequest, DetectionResponse, FaceDetector, UncheckedDetection,
};
pub use retry::{DetectionFailure, DetectionOutcome, RetryPolicy, RetryingDetector};

#[cfg(feature = "artifact-processor")]
pub use artifact_processor::ArtifactProcessorDetector;
#[cfg(feature = "aws-rekognition")]
pub use aws_rekognition::AwsRekognitionDetector;
