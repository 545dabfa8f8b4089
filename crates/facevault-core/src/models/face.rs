use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized bounding box. Each component is a fraction of the image
/// dimension and lies in [0, 1] once clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// Clamp a value into `[min, max]`, mapping NaN to 0. Returns the value and
/// whether it had to change.
fn clamp_value(value: f64, min: f64, max: f64) -> (f64, bool) {
    if value.is_nan() {
        return (0.0, true);
    }
    let clamped = value.clamp(min, max);
    (clamped, clamped != value)
}

/// Clamp a detection confidence into [0, 100]. Returns whether it changed.
pub fn clamp_confidence(value: f64) -> (f64, bool) {
    clamp_value(value, 0.0, 100.0)
}

impl BoundingBox {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Copy of this box with every component clamped into [0, 1], plus
    /// whether any component was out of range.
    pub fn clamped(&self) -> (BoundingBox, bool) {
        let (left, l) = clamp_value(self.left, 0.0, 1.0);
        let (top, t) = clamp_value(self.top, 0.0, 1.0);
        let (width, w) = clamp_value(self.width, 0.0, 1.0);
        let (height, h) = clamp_value(self.height, 0.0, 1.0);
        (
            BoundingBox {
                left,
                top,
                width,
                height,
            },
            l || t || w || h,
        )
    }

    pub fn is_normalized(&self) -> bool {
        [self.left, self.top, self.width, self.height]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

/// One detected face as stored on the file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRecord {
    /// Positional id (`face_0`, `face_1`, ...) within the owning file.
    pub face_id: String,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// A detection as returned by a backend after shape validation: geometry
/// and confidence in range, attributes still vendor-shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetection {
    pub bounding_box: BoundingBox,
    pub confidence: f64,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}
