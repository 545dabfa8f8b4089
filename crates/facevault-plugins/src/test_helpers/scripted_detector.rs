//! Scripted face detector for testing
//!
//! Responses are queued per file id and consumed one per call; files without a
//! script get the default response. The detector also records call counts and
//! the highest number of concurrent calls seen for a single file.

use async_trait::async_trait;
use facevault_core::models::{BoundingBox, RawDetection};
use facevault_core::DetectionError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::detector::{DetectionRequest, DetectionResponse, FaceDetector};

#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    result: Result<Vec<RawDetection>, DetectionError>,
    delay: Option<Duration>,
}

impl ScriptedResponse {
    /// Success with `n` well-formed detections.
    pub fn faces(n: usize) -> Self {
        let detections = (0..n)
            .map(|i| RawDetection {
                bounding_box: BoundingBox::new(0.1 * (i % 8) as f64, 0.1, 0.1, 0.1),
                confidence: 90.0 + (i % 10) as f64,
                attributes: Default::default(),
            })
            .collect();
        Self::detections(detections)
    }

    pub fn detections(detections: Vec<RawDetection>) -> Self {
        Self {
            result: Ok(detections),
            delay: None,
        }
    }

    pub fn transient(message: &str) -> Self {
        Self {
            result: Err(DetectionError::transient(message)),
            delay: None,
        }
    }

    pub fn fatal(message: &str) -> Self {
        Self {
            result: Err(DetectionError::fatal(message)),
            delay: None,
        }
    }

    /// Sleep for `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    scripts: HashMap<String, VecDeque<ScriptedResponse>>,
    calls: HashMap<String, usize>,
    in_flight: HashMap<String, usize>,
    max_concurrent_per_file: usize,
}

#[derive(Debug)]
pub struct ScriptedDetector {
    state: Mutex<ScriptState>,
    default_response: ScriptedResponse,
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedDetector {
    /// Detector that finds one face in every image unless scripted otherwise.
    pub fn new() -> Self {
        Self::with_default(ScriptedResponse::faces(1))
    }

    pub fn with_default(default_response: ScriptedResponse) -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            default_response,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue responses for `file_id`, answered in order.
    pub fn script(&self, file_id: &str, responses: impl IntoIterator<Item = ScriptedResponse>) {
        self.lock()
            .scripts
            .entry(file_id.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn calls(&self, file_id: &str) -> usize {
        self.lock().calls.get(file_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Highest number of simultaneous calls observed for any one file.
    pub fn max_concurrent_per_file(&self) -> usize {
        self.lock().max_concurrent_per_file
    }

    fn begin(&self, file_id: &str) -> ScriptedResponse {
        let mut state = self.lock();
        *state.calls.entry(file_id.to_string()).or_default() += 1;
        let in_flight = state.in_flight.entry(file_id.to_string()).or_default();
        *in_flight += 1;
        let current = *in_flight;
        state.max_concurrent_per_file = state.max_concurrent_per_file.max(current);
        state
            .scripts
            .get_mut(file_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_response.clone())
    }

    fn end(&self, file_id: &str) {
        if let Some(n) = self.lock().in_flight.get_mut(file_id) {
            *n = n.saturating_sub(1);
        }
    }
}

/// Decrements the in-flight count even when the call future is dropped.
struct InFlight<'a> {
    detector: &'a ScriptedDetector,
    file_id: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.detector.end(self.file_id);
    }
}

#[async_trait]
impl FaceDetector for ScriptedDetector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn detect_faces(
        &self,
        request: &DetectionRequest,
    ) -> Result<DetectionResponse, DetectionError> {
        let response = self.begin(&request.file_id);
        let _in_flight = InFlight {
            detector: self,
            file_id: &request.file_id,
        };

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        response.result.map(|detections| DetectionResponse {
            detections,
            diagnostics: serde_json::json!({"backend": "scripted"}),
        })
    }
}
