//! Error types for dcs-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use dcs_types::{DcsError, ErrorClass};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Bootstrap of the service graph failed
    #[error("Bootstrap error: {0}")]
    Bootstrap(#[from] DcsError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Refused or failed by the service
    #[error(transparent)]
    Dcs(#[from] DcsError),

    /// Malformed request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No caller identity on the request
    #[error("Missing caller identity: set the x-dcs-actor header")]
    MissingActor,

    /// The caller claimed an internal service identity
    #[error("Actor id {0} is reserved for the service itself")]
    ReservedActor(String),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub class: ErrorClass,
}

/// HTTP status for a service error. Denials are 4xx, an unavailable
/// collaborator is 503 and an unrecordable action is 500.
pub fn status_for(err: &DcsError) -> StatusCode {
    match err.class() {
        ErrorClass::Fatal => return StatusCode::INTERNAL_SERVER_ERROR,
        ErrorClass::Transient => return StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Denial => {}
    }
    match err {
        DcsError::NotFound(_) => StatusCode::NOT_FOUND,
        DcsError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
        DcsError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        DcsError::IllegalTransition(_)
        | DcsError::VersionConflict { .. }
        | DcsError::ContentLocked(_)
        | DcsError::OrderDependencyNotMet { .. }
        | DcsError::RetryLimitExceeded(_) => StatusCode::CONFLICT,
        DcsError::DeadlineExpired { .. } => StatusCode::GONE,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, class) = match &self {
            ApiError::Dcs(err) => (status_for(err), err.code(), err.class()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", ErrorClass::Denial),
            ApiError::MissingActor => (StatusCode::UNAUTHORIZED, "MISSING_ACTOR", ErrorClass::Denial),
            ApiError::ReservedActor(_) => (StatusCode::FORBIDDEN, "RESERVED_ACTOR", ErrorClass::Denial),
        };
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            class,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;
