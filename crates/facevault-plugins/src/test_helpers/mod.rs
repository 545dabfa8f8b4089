//! Test helpers for detector consumers
//!
//! A scripted `FaceDetector` that needs no external service.

pub mod scripted_detector;

pub use scripted_detector::{ScriptedDetector, ScriptedResponse};
