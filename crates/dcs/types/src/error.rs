//! The DCS error taxonomy.
//!
//! Business-rule violations are typed, recoverable denials. Timeouts and
//! outages of external collaborators are transient and retried by the
//! caller. An audit-ledger write failure is the single fatal condition.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DcsError {
    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("version conflict: edit based on version {base}, current version is {current}")]
    VersionConflict { base: u64, current: u64 },

    #[error("content locked: {0}")]
    ContentLocked(String),

    #[error("order dependency not met: {signer} must wait for {}", waiting_on.join(", "))]
    OrderDependencyNotMet {
        signer: String,
        waiting_on: Vec<String>,
    },

    #[error("signing deadline expired at {deadline}")]
    DeadlineExpired {
        deadline: chrono::DateTime<chrono::Utc>,
    },

    #[error("credential invalid: {0}")]
    CredentialInvalid(String),

    #[error("scope mismatch: {0}")]
    ScopeMismatch(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("invalid template state: {0}")]
    InvalidTemplateState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("retry limit exceeded: {0}")]
    RetryLimitExceeded(String),

    #[error("external collaborator unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Boundary classification of an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A business rule refused the request (4xx-equivalent).
    Denial,
    /// An external collaborator did not answer in time (retriable, 503-equivalent).
    Transient,
    /// The system could not record the action (5xx-equivalent).
    Fatal,
}

impl DcsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StorageUnavailable(_) => ErrorClass::Fatal,
            Self::ExternalUnavailable(_) => ErrorClass::Transient,
            _ => ErrorClass::Denial,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalTransition(_) => "ILLEGAL_TRANSITION",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::ContentLocked(_) => "CONTENT_LOCKED",
            Self::OrderDependencyNotMet { .. } => "ORDER_DEPENDENCY_NOT_MET",
            Self::DeadlineExpired { .. } => "DEADLINE_EXPIRED",
            Self::CredentialInvalid(_) => "CREDENTIAL_INVALID",
            Self::ScopeMismatch(_) => "SCOPE_MISMATCH",
            Self::IntegrityViolation(_) => "INTEGRITY_VIOLATION",
            Self::AuthorizationDenied(_) => "AUTHORIZATION_DENIED",
            Self::InvalidTemplateState(_) => "INVALID_TEMPLATE_STATE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::RetryLimitExceeded(_) => "RETRY_LIMIT_EXCEEDED",
            Self::ExternalUnavailable(_) => "EXTERNAL_UNAVAILABLE",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        }
    }
}

pub type DcsResult<T> = Result<T, DcsError>;
