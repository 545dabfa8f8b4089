use async_trait::async_trait;
use facevault_core::models::{clamp_confidence, BoundingBox, FileRecord, RawDetection};
use facevault_core::DetectionError;
use serde::{Deserialize, Serialize};

/// One face-detection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRequest {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub user_id: Option<String>,
    /// URL (or store reference) the backend fetches the image from.
    pub image_reference: String,
    pub requested_attributes: Vec<String>,
}

impl DetectionRequest {
    pub fn for_record(record: &FileRecord, requested_attributes: &[String]) -> Self {
        Self {
            file_id: record.id.clone(),
            file_name: record.file_name.clone(),
            content_type: record.file_type.clone(),
            user_id: record.user_id.clone(),
            image_reference: record.image_reference().to_string(),
            requested_attributes: requested_attributes.to_vec(),
        }
    }
}

/// Successful detection: shape-validated detections plus backend diagnostics.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectionResponse {
    pub detections: Vec<RawDetection>,
    pub diagnostics: serde_json::Value,
}

/// A detection as parsed from a backend, before range checks.
#[derive(Debug, Clone, Default)]
pub struct UncheckedDetection {
    pub bounding_box: Option<BoundingBox>,
    pub confidence: Option<f64>,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Face detection backend.
#[async_trait]
pub trait FaceDetector: Send + Sync + std::fmt::Debug {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Run one detection call. No retries happen at this level.
    async fn detect_faces(
        &self,
        request: &DetectionRequest,
    ) -> Result<DetectionResponse, DetectionError>;
}

/// Shape validation shared by all backends.
///
/// Out-of-range boxes and confidences are clamped (NaN becomes 0) and logged;
/// detections without a bounding box are dropped. Input order is kept.
pub fn sanitize_detections(file_id: &str, detections: Vec<UncheckedDetection>) -> Vec<RawDetection> {
    detections
        .into_iter()
        .enumerate()
        .filter_map(|(index, detection)| {
            let Some(raw_box) = detection.bounding_box else {
                tracing::warn!(file_id = %file_id, index, "Dropping detection without bounding box");
                return None;
            };

            let (bounding_box, box_clamped) = raw_box.clamped();
            if box_clamped {
                tracing::warn!(
                    file_id = %file_id,
                    index,
                    original = ?raw_box,
                    clamped = ?bounding_box,
                    "Bounding box out of range, clamped"
                );
            }

            let raw_confidence = detection.confidence.unwrap_or(0.0);
            let (confidence, confidence_clamped) = clamp_confidence(raw_confidence);
            if confidence_clamped {
                tracing::warn!(
                    file_id = %file_id,
                    index,
                    original = raw_confidence,
                    clamped = confidence,
                    "Confidence out of range, clamped"
                );
            }

            Some(RawDetection {
                bounding_box,
                confidence,
                attributes: detection.attributes,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_clamps_and_drops() {
        let detections = vec![
            UncheckedDetection {
                bounding_box: Some(BoundingBox::new(0.1, 0.2, 0.3, 0.4)),
                confidence: Some(99.0),
                ..Default::default()
            },
            UncheckedDetection {
                bounding_box: None,
                confidence: Some(80.0),
                ..Default::default()
            },
            UncheckedDetection {
                bounding_box: Some(BoundingBox::new(-0.5, 0.9, 0.4, 1.7)),
                confidence: Some(f64::NAN),
                ..Default::default()
            },
        ];

        let sanitized = sanitize_detections("file-1", detections);
        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized[0].confidence, 99.0);
        assert_eq!(sanitized[1].bounding_box, BoundingBox::new(0.0, 0.9, 0.4, 1.0));
        assert_eq!(sanitized[1].confidence, 0.0);
        assert!(sanitized.iter().all(|d| d.bounding_box.is_normalized()));
    }

    #[test]
    fn request_uses_download_url_when_present() {
        let record = FileRecord::new("f1", "me.png", "image/png", 2048)
            .with_user("u1")
            .with_download_url("https://cdn.example.com/f1.png");
        let request = DetectionRequest::for_record(&record, &["ALL".to_string()]);
        assert_eq!(request.image_reference, "https://cdn.example.com/f1.png");
        assert_eq!(request.user_id.as_deref(), Some("u1"));
        assert_eq!(request.requested_attributes, vec!["ALL"]);
    }
}
