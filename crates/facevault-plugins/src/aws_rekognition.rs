//! AWS Rekognition face detection backend
//!
//! Downloads the image from its reference URL and runs `DetectFaces` with the
//! configured attribute set on the raw bytes. Face attributes are passed on in
//! Rekognition's own PascalCase shape; the aggregator normalizes them.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_rekognition::error::SdkError;
use aws_sdk_rekognition::operation::detect_faces::DetectFacesError;
use aws_sdk_rekognition::primitives::Blob;
use aws_sdk_rekognition::types::{Attribute, FaceDetail, Image};
use aws_sdk_rekognition::Client as RekognitionClient;
use bytes::Bytes;
use facevault_core::models::BoundingBox;
use facevault_core::{DetectionError, DetectionResultExt};
use serde_json::{json, Map, Value};
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::detector::{
    sanitize_detections, DetectionRequest, DetectionResponse, FaceDetector, UncheckedDetection,
};

pub struct AwsRekognitionDetector {
    client: RekognitionClient,
    http_client: reqwest::Client,
    region: String,
}

impl Debug for AwsRekognitionDetector {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("AwsRekognitionDetector")
            .field("region", &self.region)
            .finish()
    }
}

impl AwsRekognitionDetector {
    /// Create a detector for the given region using the default AWS
    /// credential chain.
    pub async fn new(region: &str, download_timeout: Duration) -> Result<Self, DetectionError> {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let http_client = reqwest::Client::builder()
            .timeout(download_timeout)
            .build()
            .fatal("failed to create HTTP client for image download")?;

        Ok(Self {
            client: RekognitionClient::new(&config),
            http_client,
            region: region.to_string(),
        })
    }

    async fn fetch_image(&self, url: &str) -> Result<Bytes, DetectionError> {
        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                DetectionError::fatal("invalid image reference")
            } else {
                DetectionError::transient("image download failed")
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DetectionError::transient(format!(
                "image download returned HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(DetectionError::fatal(format!(
                "image download returned HTTP {}",
                status.as_u16()
            )));
        }

        response
            .bytes()
            .await
            .transient("image download interrupted")
    }

    fn classify(err: &SdkError<DetectFacesError>) -> DetectionError {
        match err {
            SdkError::ServiceError(service_err) => {
                let e = service_err.err();
                if e.is_throttling_exception()
                    || e.is_provisioned_throughput_exceeded_exception()
                    || e.is_internal_server_error()
                {
                    DetectionError::transient(format!("rekognition unavailable: {}", error_code(e)))
                } else if e.is_invalid_image_format_exception() {
                    DetectionError::fatal("unsupported image format")
                } else if e.is_image_too_large_exception() {
                    DetectionError::fatal("image too large")
                } else if e.is_access_denied_exception() {
                    DetectionError::fatal("access denied by rekognition")
                } else {
                    DetectionError::fatal(format!("rekognition rejected request: {}", error_code(e)))
                }
            }
            SdkError::TimeoutError(_) => DetectionError::transient("rekognition request timed out"),
            SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                DetectionError::transient("rekognition request failed in transit")
            }
            _ => DetectionError::fatal("rekognition request could not be constructed"),
        }
    }

    fn face_attributes(face: &FaceDetail) -> Map<String, Value> {
        let mut attributes = Map::new();
        if let Some(age) = face.age_range() {
            attributes.insert(
                "AgeRange".to_string(),
                json!({"Low": age.low(), "High": age.high()}),
            );
        }
        if let Some(gender) = face.gender() {
            attributes.insert(
                "Gender".to_string(),
                json!({
                    "Value": gender.value().map(|v| v.as_str()),
                    "Confidence": gender.confidence(),
                }),
            );
        }
        let emotions: Vec<Value> = face
            .emotions()
            .iter()
            .map(|emotion| {
                json!({
                    "Type": emotion.r#type().map(|t| t.as_str()),
                    "Confidence": emotion.confidence(),
                })
            })
            .collect();
        if !emotions.is_empty() {
            attributes.insert("Emotions".to_string(), Value::Array(emotions));
        }
        if let Some(smile) = face.smile() {
            attributes.insert(
                "Smile".to_string(),
                json!({"Value": smile.value(), "Confidence": smile.confidence()}),
            );
        }
        attributes
    }

    fn to_unchecked(face: &FaceDetail) -> UncheckedDetection {
        let bounding_box = face.bounding_box().map(|b| BoundingBox {
            left: b.left().map(f64::from).unwrap_or(f64::NAN),
            top: b.top().map(f64::from).unwrap_or(f64::NAN),
            width: b.width().map(f64::from).unwrap_or(f64::NAN),
            height: b.height().map(f64::from).unwrap_or(f64::NAN),
        });
        UncheckedDetection {
            bounding_box,
            confidence: face.confidence().map(f64::from),
            attributes: Self::face_attributes(face),
        }
    }
}

fn error_code(err: &DetectFacesError) -> String {
    use aws_sdk_rekognition::error::ProvideErrorMetadata;
    err.code().unwrap_or("unknown").to_string()
}

#[async_trait]
impl FaceDetector for AwsRekognitionDetector {
    fn name(&self) -> &str {
        "aws_rekognition"
    }

    #[tracing::instrument(skip(self, request), fields(file_id = %request.file_id, region = %self.region))]
    async fn detect_faces(
        &self,
        request: &DetectionRequest,
    ) -> Result<DetectionResponse, DetectionError> {
        let image_bytes = self.fetch_image(&request.image_reference).await?;
        let image_size = image_bytes.len();

        let attributes: Vec<Attribute> = request
            .requested_attributes
            .iter()
            .map(|a| Attribute::from(a.to_uppercase().as_str()))
            .collect();

        let image = Image::builder()
            .bytes(Blob::new(Vec::from(image_bytes)))
            .build();

        let output = self
            .client
            .detect_faces()
            .image(image)
            .set_attributes(Some(attributes))
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(error = ?e, "Rekognition DetectFaces failed");
                Self::classify(&e)
            })?;

        let unchecked: Vec<UncheckedDetection> =
            output.face_details().iter().map(Self::to_unchecked).collect();
        let detections = sanitize_detections(&request.file_id, unchecked);

        Ok(DetectionResponse {
            detections,
            diagnostics: json!({
                "backend": "aws_rekognition",
                "region": self.region,
                "image_bytes": image_size,
                "orientation_correction": output.orientation_correction().map(|o| o.as_str()),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_rekognition::types::{AgeRange, BoundingBox as AwsBoundingBox, Emotion, EmotionName};

    #[test]
    fn test_face_detail_conversion() {
        let face = FaceDetail::builder()
            .bounding_box(
                AwsBoundingBox::builder()
                    .left(0.1)
                    .top(0.2)
                    .width(0.3)
                    .height(0.4)
                    .build(),
            )
            .confidence(99.9)
            .age_range(AgeRange::builder().low(25).high(35).build())
            .emotions(
                Emotion::builder()
                    .r#type(EmotionName::Happy)
                    .confidence(85.0)
                    .build(),
            )
            .build();

        let detection = AwsRekognitionDetector::to_unchecked(&face);
        let bbox = detection.bounding_box.unwrap();
        assert!((bbox.left - 0.1).abs() < 1e-6);
        assert!((bbox.height - 0.4).abs() < 1e-6);
        assert_eq!(detection.attributes["AgeRange"]["Low"], 25);
        assert_eq!(detection.attributes["Emotions"][0]["Type"], "HAPPY");
    }

    #[test]
    fn test_missing_box_component_becomes_nan() {
        let face = FaceDetail::builder()
            .bounding_box(AwsBoundingBox::builder().left(0.1).top(0.2).width(0.3).build())
            .build();
        let detection = AwsRekognitionDetector::to_unchecked(&face);
        assert!(detection.bounding_box.unwrap().height.is_nan());
        assert!(detection.confidence.is_none());
    }
}
