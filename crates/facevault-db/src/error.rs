use facevault_core::models::VectorizationStatus;
use facevault_core::AppError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        from: VectorizationStatus,
        to: VectorizationStatus,
    },

    #[error("file record already exists: {0}")]
    AlreadyExists(String),

    /// A stored row could not be mapped back to a file record.
    #[error("corrupt file record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::AlreadyExists(db_err.message().to_string());
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => AppError::StoreUnavailable(msg),
            StoreError::AlreadyExists(id) => {
                AppError::InvalidInput(format!("File record already exists: {}", id))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}
