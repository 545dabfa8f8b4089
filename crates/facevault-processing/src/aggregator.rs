//! Face record aggregator
//!
//! Normalizes vendor-specific detection output into `FaceRecord`s. Attribute
//! keys are converted to snake_case at every nesting level (`AgeRange.Low`
//! becomes `age_range.low`), vendor face ids are discarded, and each face is
//! numbered by its position after confidence filtering. Input order is kept
//! so identical input always yields identical output.

use facevault_core::models::{clamp_confidence, FaceRecord, RawDetection};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Attribute keys that carry a vendor identity rather than a face attribute.
const VENDOR_ID_KEYS: &[&str] = &["face_id", "id"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedFaces {
    pub face_count: u32,
    pub faces: Vec<FaceRecord>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FaceAggregator {
    min_confidence: f64,
}

impl FaceAggregator {
    /// `min_confidence` is the inclusive floor in [0, 100]; 0 keeps everything.
    pub fn new(min_confidence: f64) -> Self {
        Self {
            min_confidence: clamp_confidence(min_confidence).0,
        }
    }

    pub fn aggregate(&self, detections: &[RawDetection]) -> AggregatedFaces {
        let faces: Vec<FaceRecord> = detections
            .iter()
            .filter(|d| d.confidence >= self.min_confidence)
            .enumerate()
            .map(|(index, detection)| FaceRecord {
                face_id: format!("face_{}", index),
                bounding_box: detection.bounding_box.clamped().0,
                confidence: clamp_confidence(detection.confidence).0,
                attributes: normalize_attributes(&detection.attributes),
            })
            .collect();

        let dropped = detections.len() - faces.len();
        if dropped > 0 {
            tracing::debug!(
                dropped,
                min_confidence = self.min_confidence,
                "Dropped detections below confidence floor"
            );
        }

        AggregatedFaces {
            face_count: faces.len() as u32,
            faces,
        }
    }
}

fn normalize_attributes(attributes: &Map<String, Value>) -> BTreeMap<String, Value> {
    attributes
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (to_snake_case(key), normalize_value(value)))
        .filter(|(key, _)| !VENDOR_ID_KEYS.contains(&key.as_str()))
        .collect()
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (to_snake_case(k), normalize_value(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => other.clone(),
    }
}

/// `AgeRange`, `ageRange` and `age_range` all become `age_range`. An
/// uppercase run is treated as one word (`EyeDirectionURL` ->
/// `eye_direction_url`).
fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use facevault_core::models::BoundingBox;
    use serde_json::json;

    fn detection(confidence: f64, attributes: Value) -> RawDetection {
        RawDetection {
            bounding_box: BoundingBox::new(0.1, 0.2, 0.3, 0.4),
            confidence,
            attributes: attributes.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("AgeRange"), "age_range");
        assert_eq!(to_snake_case("ageRange"), "age_range");
        assert_eq!(to_snake_case("age_range"), "age_range");
        assert_eq!(to_snake_case("Emotions"), "emotions");
        assert_eq!(to_snake_case("FaceId"), "face_id");
        assert_eq!(to_snake_case("EyeDirectionURL"), "eye_direction_url");
        assert_eq!(to_snake_case("Type"), "type");
    }

    #[test]
    fn test_normalizes_vendor_attributes() {
        let aggregator = FaceAggregator::default();
        let result = aggregator.aggregate(&[detection(
            99.5,
            json!({
                "faceId": "vendor-face-7",
                "AgeRange": {"Low": 25, "High": 35},
                "Emotions": [{"Type": "HAPPY", "Confidence": 85.2}],
                "gender": {"Value": "Male", "Confidence": 96.1},
                "landmarks": null
            }),
        )]);

        assert_eq!(result.face_count, 1);
        let face = &result.faces[0];
        assert_eq!(face.face_id, "face_0");
        assert_eq!(face.attributes["age_range"], json!({"low": 25, "high": 35}));
        assert_eq!(
            face.attributes["emotions"],
            json!([{"type": "HAPPY", "confidence": 85.2}])
        );
        assert_eq!(face.attributes["gender"]["value"], "Male");
        assert!(!face.attributes.contains_key("face_id"));
        assert!(!face.attributes.contains_key("landmarks"));
    }

    #[test]
    fn test_confidence_floor_keeps_order_and_renumbers() {
        let aggregator = FaceAggregator::new(50.0);
        let result = aggregator.aggregate(&[
            detection(80.0, json!({"marker": "first"})),
            detection(20.0, json!({"marker": "dropped"})),
            detection(50.0, json!({"marker": "second"})),
            detection(95.0, json!({"marker": "third"})),
        ]);

        assert_eq!(result.face_count, 3);
        assert_eq!(result.faces.len(), 3);
        let markers: Vec<_> = result
            .faces
            .iter()
            .map(|f| f.attributes["marker"].as_str().unwrap())
            .collect();
        assert_eq!(markers, vec!["first", "second", "third"]);
        let ids: Vec<_> = result.faces.iter().map(|f| f.face_id.as_str()).collect();
        assert_eq!(ids, vec!["face_0", "face_1", "face_2"]);
    }

    #[test]
    fn test_default_floor_keeps_everything() {
        let result = FaceAggregator::default().aggregate(&[detection(0.0, json!({}))]);
        assert_eq!(result.face_count, 1);
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let input = vec![
            detection(70.0, json!({"Smile": {"Value": true}})),
            detection(90.0, json!({})),
        ];
        let aggregator = FaceAggregator::default();
        assert_eq!(aggregator.aggregate(&input), aggregator.aggregate(&input));
    }

    #[test]
    fn test_empty_input() {
        let result = FaceAggregator::new(10.0).aggregate(&[]);
        assert_eq!(result.face_count, 0);
        assert!(result.faces.is_empty());
    }
}
