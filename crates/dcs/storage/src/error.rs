use dcs_types::DcsError;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("revision conflict on {entity}: expected {expected}, found {actual}")]
    RevisionConflict {
        entity: String,
        expected: u64,
        actual: u64,
    },

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<StorageError> for DcsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => DcsError::NotFound(what),
            StorageError::Duplicate(what) => DcsError::InvalidInput(format!("duplicate {what}")),
            StorageError::RevisionConflict {
                expected, actual, ..
            } => DcsError::VersionConflict {
                base: expected,
                current: actual,
            },
            StorageError::InvariantViolation(msg) => DcsError::IntegrityViolation(msg),
            StorageError::Serialization(msg) | StorageError::Backend(msg) => {
                DcsError::StorageUnavailable(msg)
            }
        }
    }
}
