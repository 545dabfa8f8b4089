//! Face record aggregation
//!
//! Turns shape-validated detections from any backend into the stable
//! `FaceRecord` list stored on a file record.

pub mod aggregator;

pub use aggregator::{AggregatedFaces, FaceAggregator};
