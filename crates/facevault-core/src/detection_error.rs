//! Face detection error types
//!
//! Errors returned by a face detection backend carry a machine-readable kind so
//! the retry layer can tell errors worth retrying (transient) from errors that
//! will not change on retry (fatal).

use std::fmt;

/// Classification of a detection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionErrorKind {
    /// Network timeout, rate limiting, 5xx-equivalent. Retryable.
    Transient,
    /// Unsupported or corrupt image, 4xx-equivalent validation or authorization
    /// failure. Never retried.
    Fatal,
}

impl fmt::Display for DetectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionErrorKind::Transient => write!(f, "transient"),
            DetectionErrorKind::Fatal => write!(f, "fatal"),
        }
    }
}

/// Detection error that is either transient or fatal.
///
/// The message is a classified, human-readable cause. Backends must not put
/// raw response bodies or internal traces in it: it ends up in the file
/// record's `vectorizationError`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct DetectionError {
    kind: DetectionErrorKind,
    message: String,
}

impl DetectionError {
    /// Create a new transient detection error
    ///
    /// Transient errors are retried according to the client's retry policy.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: DetectionErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Create a new fatal detection error
    ///
    /// Fatal errors fail the job immediately without retrying.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: DetectionErrorKind::Fatal,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> DetectionErrorKind {
        self.kind
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        self.kind == DetectionErrorKind::Transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Extension trait for Result to tag an arbitrary error as a detection error
pub trait DetectionResultExt<T> {
    /// Mark this result as fatal on error, prefixing the cause with `context`
    fn fatal(self, context: &str) -> Result<T, DetectionError>;

    /// Mark this result as transient on error, prefixing the cause with `context`
    fn transient(self, context: &str) -> Result<T, DetectionError>;
}

impl<T, E: fmt::Display> DetectionResultExt<T> for Result<T, E> {
    fn fatal(self, context: &str) -> Result<T, DetectionError> {
        self.map_err(|e| DetectionError::fatal(format!("{}: {}", context, e)))
    }

    fn transient(self, context: &str) -> Result<T, DetectionError> {
        self.map_err(|e| DetectionError::transient(format!("{}: {}", context, e)))
    }
}
