//! HTTP artifact-processor face detection backend
//!
//! Talks to a service exposing `POST /process-artifact`. The service wraps its
//! answer in a `{result: {success, data: {analysis: {faces, metadata}}, error}}`
//! envelope; faces come with either PascalCase or camelCase geometry keys.

use async_trait::async_trait;
use facevault_core::models::BoundingBox;
use facevault_core::{DetectionError, DetectionResultExt};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::detector::{
    sanitize_detections, DetectionRequest, DetectionResponse, FaceDetector, UncheckedDetection,
};

/// Longest remote error message copied into a failure cause.
const MAX_REMOTE_MESSAGE_LEN: usize = 200;

/// Keys consumed as geometry or identity, never passed through as attributes.
const RESERVED_KEYS: &[&str] = &[
    "faceId",
    "FaceId",
    "boundingBox",
    "BoundingBox",
    "confidence",
    "Confidence",
];

#[derive(Debug, Deserialize)]
struct Envelope {
    result: Option<EnvelopeResult>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeResult {
    #[serde(default)]
    success: bool,
    data: Option<EnvelopeData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    analysis: Option<Analysis>,
}

#[derive(Debug, Deserialize)]
struct Analysis {
    #[serde(default)]
    faces: Vec<Value>,
    #[serde(default)]
    metadata: Value,
}

pub struct ArtifactProcessorDetector {
    http_client: reqwest::Client,
    base_url: String,
}

impl Debug for ArtifactProcessorDetector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ArtifactProcessorDetector")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ArtifactProcessorDetector {
    /// `request_timeout` bounds one HTTP exchange; the retry layer applies
    /// its own per-attempt timeout on top.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, DetectionError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .fatal("failed to create HTTP client for artifact processor")?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/process-artifact", self.base_url)
    }

    fn classify_status(status: reqwest::StatusCode) -> DetectionError {
        let message = format!("artifact processor returned HTTP {}", status.as_u16());
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            DetectionError::transient(message)
        } else {
            DetectionError::fatal(message)
        }
    }

    fn classify_transport(err: &reqwest::Error) -> DetectionError {
        if err.is_timeout() {
            DetectionError::transient("artifact processor request timed out")
        } else if err.is_connect() {
            DetectionError::transient("could not connect to artifact processor")
        } else if err.is_request() {
            DetectionError::transient("artifact processor request failed")
        } else {
            DetectionError::fatal("artifact processor request could not be built")
        }
    }

    fn parse_faces(faces: Vec<Value>) -> Vec<UncheckedDetection> {
        faces
            .into_iter()
            .map(|face| {
                let Value::Object(mut fields) = face else {
                    return UncheckedDetection::default();
                };
                let bounding_box = pick(&fields, &["boundingBox", "BoundingBox"]).and_then(parse_box);
                let confidence = pick(&fields, &["confidence", "Confidence"]).and_then(as_f64);
                for key in RESERVED_KEYS {
                    fields.remove(*key);
                }
                UncheckedDetection {
                    bounding_box,
                    confidence,
                    attributes: fields,
                }
            })
            .collect()
    }
}

fn pick<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| fields.get(*k)).filter(|v| !v.is_null())
}

/// Numbers, and numeric strings (some producers serialize NaN as "NaN").
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn parse_box(value: &Value) -> Option<BoundingBox> {
    let Value::Object(fields) = value else {
        return None;
    };
    let component = |keys: &[&str]| pick(fields, keys).and_then(as_f64);
    Some(BoundingBox {
        left: component(&["Left", "left"])?,
        top: component(&["Top", "top"])?,
        width: component(&["Width", "width"])?,
        height: component(&["Height", "height"])?,
    })
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_REMOTE_MESSAGE_LEN {
        message.to_string()
    } else {
        let truncated: String = message.chars().take(MAX_REMOTE_MESSAGE_LEN).collect();
        format!("{}...", truncated)
    }
}

#[async_trait]
impl FaceDetector for ArtifactProcessorDetector {
    fn name(&self) -> &str {
        "artifact_processor"
    }

    #[tracing::instrument(skip(self, request), fields(file_id = %request.file_id))]
    async fn detect_faces(
        &self,
        request: &DetectionRequest,
    ) -> Result<DetectionResponse, DetectionError> {
        let body = json!({
            "fileId": request.file_id,
            "fileName": request.file_name,
            "fileUrl": request.image_reference,
            "contentType": request.content_type,
            "userId": request.user_id,
            "requestedAttributes": request.requested_attributes,
        });

        let response = self
            .http_client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = %e, "Artifact processor transport error");
                Self::classify_transport(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_status(status));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|_| DetectionError::fatal("artifact processor response could not be decoded"))?;

        let result = envelope
            .result
            .ok_or_else(|| DetectionError::fatal("artifact processor response has no result"))?;

        if !result.success {
            let reason = result
                .error
                .as_deref()
                .map(truncate_message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(DetectionError::fatal(format!(
                "artifact processor reported failure: {}",
                reason
            )));
        }

        let analysis = result
            .data
            .and_then(|d| d.analysis)
            .ok_or_else(|| DetectionError::fatal("artifact processor response has no analysis"))?;

        let detections = sanitize_detections(&request.file_id, Self::parse_faces(analysis.faces));
        tracing::debug!(faces = detections.len(), "Artifact processor detection succeeded");

        Ok(DetectionResponse {
            detections,
            diagnostics: analysis.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facevault_core::DetectionErrorKind;

    fn request() -> DetectionRequest {
        DetectionRequest {
            file_id: "file-1".to_string(),
            file_name: "portrait.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            user_id: Some("user-1".to_string()),
            image_reference: "https://cdn.example.com/portrait.jpg".to_string(),
            requested_attributes: vec!["ALL".to_string()],
        }
    }

    fn detector(server: &mockito::Server) -> ArtifactProcessorDetector {
        ArtifactProcessorDetector::new(server.url(), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_detect_faces_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/process-artifact")
            .match_body(mockito::Matcher::PartialJson(json!({
                "fileId": "file-1",
                "fileUrl": "https://cdn.example.com/portrait.jpg",
                "contentType": "image/jpeg"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "result": {
                        "success": true,
                        "data": {
                            "analysis": {
                                "faces": [{
                                    "faceId": "vendor-1",
                                    "confidence": 99.5,
                                    "boundingBox": {"Width": 0.23, "Height": 0.30, "Left": 0.35, "Top": 0.20},
                                    "landmarks": [],
                                    "emotions": [{"Type": "HAPPY", "Confidence": 85.2}],
                                    "ageRange": {"Low": 25, "High": 35}
                                }],
                                "metadata": {"processed_by": "mock"}
                            }
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let response = detector(&server).detect_faces(&request()).await.unwrap();
        mock.assert_async().await;

        assert_eq!(response.detections.len(), 1);
        let face = &response.detections[0];
        assert_eq!(face.bounding_box, BoundingBox::new(0.35, 0.20, 0.23, 0.30));
        assert_eq!(face.confidence, 99.5);
        assert!(face.attributes.contains_key("ageRange"));
        assert!(!face.attributes.contains_key("faceId"));
        assert_eq!(response.diagnostics["processed_by"], "mock");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process-artifact")
            .with_status(503)
            .with_body("upstream exploded at line 42")
            .create_async()
            .await;

        let err = detector(&server).detect_faces(&request()).await.unwrap_err();
        assert_eq!(err.kind(), DetectionErrorKind::Transient);
        assert!(!err.message().contains("line 42"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process-artifact")
            .with_status(429)
            .create_async()
            .await;

        let err = detector(&server).detect_faces(&request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_client_error_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process-artifact")
            .with_status(400)
            .with_body(r#"{"result": {"success": false, "error": "No data provided"}}"#)
            .create_async()
            .await;

        let err = detector(&server).detect_faces(&request()).await.unwrap_err();
        assert_eq!(err.kind(), DetectionErrorKind::Fatal);
    }

    #[tokio::test]
    async fn test_reported_failure_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process-artifact")
            .with_status(200)
            .with_body(r#"{"result": {"success": false, "error": "cannot identify image file"}}"#)
            .create_async()
            .await;

        let err = detector(&server).detect_faces(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(
            err.message(),
            "artifact processor reported failure: cannot identify image file"
        );
    }

    #[tokio::test]
    async fn test_undecodable_body_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/process-artifact")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let err = detector(&server).detect_faces(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let detector =
            ArtifactProcessorDetector::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = detector.detect_faces(&request()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_faces_handles_camel_case_and_string_numbers() {
        let faces = vec![
            json!({
                "Confidence": "NaN",
                "BoundingBox": {"width": 0.1, "height": 0.1, "left": 0.5, "top": 0.5}
            }),
            json!({"confidence": 50.0}),
            json!("not an object"),
        ];
        let parsed = ArtifactProcessorDetector::parse_faces(faces);
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0].bounding_box, Some(BoundingBox::new(0.5, 0.5, 0.1, 0.1)));
        assert!(parsed[0].confidence.is_some_and(f64::is_nan));
        assert!(parsed[1].bounding_box.is_none());
        assert!(parsed[2].bounding_box.is_none());
    }
}
