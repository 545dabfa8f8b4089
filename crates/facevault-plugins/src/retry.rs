//! Retry policy for face detection calls
//!
//! Transient errors are retried with capped exponential backoff; every attempt
//! runs under its own timeout, and a timed-out attempt counts as transient.
//! Fatal errors end the call immediately.

use facevault_core::{DetectionError, DetectionSettings};
use std::sync::Arc;
use std::time::Duration;

use crate::detector::{DetectionRequest, DetectionResponse, FaceDetector};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&DetectionSettings> for RetryPolicy {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            attempt_timeout: Duration::from_secs(settings.attempt_timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base ...
    /// capped at `max_backoff`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Successful detection and how many external calls it took.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub response: DetectionResponse,
    pub attempts: u32,
}

/// Final detection error and how many external calls were made.
#[derive(Debug, Clone)]
pub struct DetectionFailure {
    pub error: DetectionError,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryingDetector {
    detector: Arc<dyn FaceDetector>,
    policy: RetryPolicy,
}

impl RetryingDetector {
    pub fn new(detector: Arc<dyn FaceDetector>, policy: RetryPolicy) -> Self {
        Self { detector, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &str {
        self.detector.name()
    }

    /// Detect faces with retries, making at most `min(max_attempts, budget)`
    /// calls. A zero budget fails without calling the backend.
    #[tracing::instrument(skip(self, request), fields(file_id = %request.file_id, backend = %self.detector.name()))]
    pub async fn detect(
        &self,
        request: &DetectionRequest,
        budget: u32,
    ) -> Result<DetectionOutcome, DetectionFailure> {
        let max_attempts = self.policy.max_attempts.min(budget);
        if max_attempts == 0 {
            return Err(DetectionFailure {
                error: DetectionError::fatal("no detection attempts left"),
                attempts: 0,
            });
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.detector.detect_faces(request),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DetectionError::transient(format!(
                    "detection attempt timed out after {}s",
                    self.policy.attempt_timeout.as_secs()
                ))),
            };

            match result {
                Ok(response) => {
                    return Ok(DetectionOutcome {
                        response,
                        attempts: attempt,
                    })
                }
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let backoff = self.policy.backoff_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "Transient detection error, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(error) => {
                    return Err(DetectionFailure {
                        error,
                        attempts: attempt,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedDetector, ScriptedResponse};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(200),
        }
    }

    fn request() -> DetectionRequest {
        DetectionRequest {
            file_id: "file-1".to_string(),
            file_name: "a.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            user_id: None,
            image_reference: "file-1".to_string(),
            requested_attributes: vec!["ALL".to_string()],
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff_for(5), Duration::from_secs(8));
        assert_eq!(policy.backoff_for(30), Duration::from_secs(8));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let detector = Arc::new(ScriptedDetector::new());
        detector.script(
            "file-1",
            [
                ScriptedResponse::transient("rate limited"),
                ScriptedResponse::transient("rate limited"),
                ScriptedResponse::faces(2),
            ],
        );
        let retrying = RetryingDetector::new(detector.clone(), fast_policy());

        let outcome = retrying.detect(&request(), 5).await.unwrap();
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.response.detections.len(), 2);
        assert_eq!(detector.calls("file-1"), 3);
    }

    #[tokio::test]
    async fn test_fatal_is_not_retried() {
        let detector = Arc::new(ScriptedDetector::new());
        detector.script("file-1", [ScriptedResponse::fatal("corrupt image")]);
        let retrying = RetryingDetector::new(detector.clone(), fast_policy());

        let failure = retrying.detect(&request(), 5).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(!failure.error.is_retryable());
        assert_eq!(detector.calls("file-1"), 1);
    }

    #[tokio::test]
    async fn test_exhausts_policy_attempts() {
        let detector = Arc::new(ScriptedDetector::new());
        detector.script(
            "file-1",
            std::iter::repeat_with(|| ScriptedResponse::transient("503")).take(5),
        );
        let retrying = RetryingDetector::new(detector.clone(), fast_policy());

        let failure = retrying.detect(&request(), 5).await.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert!(failure.error.is_retryable());
        assert_eq!(detector.calls("file-1"), 3);
    }

    #[tokio::test]
    async fn test_budget_limits_attempts() {
        let detector = Arc::new(ScriptedDetector::new());
        detector.script(
            "file-1",
            std::iter::repeat_with(|| ScriptedResponse::transient("503")).take(5),
        );
        let retrying = RetryingDetector::new(detector.clone(), fast_policy());

        let failure = retrying.detect(&request(), 1).await.unwrap_err();
        assert_eq!(failure.attempts, 1);

        let none = retrying.detect(&request(), 0).await.unwrap_err();
        assert_eq!(none.attempts, 0);
        assert_eq!(detector.calls("file-1"), 1);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out_as_transient() {
        let detector = Arc::new(ScriptedDetector::new());
        detector.script(
            "file-1",
            [
                ScriptedResponse::faces(1).delayed(Duration::from_secs(5)),
                ScriptedResponse::faces(1),
            ],
        );
        let retrying = RetryingDetector::new(detector.clone(), fast_policy());

        let outcome = retrying.detect(&request(), 5).await.unwrap();
        assert_eq!(outcome.attempts, 2);
    }
}
