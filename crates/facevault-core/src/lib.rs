//! Facevault Core Library
//!
//! This crate provides the domain models, error types, detection error
//! classification and configuration shared by every facevault component.

pub mod config;
pub mod detection_error;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{
    Config, DetectionBackend, DetectionSettings, DispatchSettings, LogFormat, QueueSettings,
    StoreBackend, StoreSettings,
};
pub use detection_error::{DetectionError, DetectionErrorKind, DetectionResultExt};
pub use error::{AppError, ErrorMetadata, LogLevel};
