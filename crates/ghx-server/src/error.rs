//! HTTP-facing error type: wraps the core crates' errors with the
//! status code each one maps to.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ghx_orchestrator::OrchestratorError;
use ghx_proto::ProtoError;
use serde::Serialize;
use thiserror::Error;

/// Result alias for HTTP handlers.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors an HTTP handler can return.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The request body failed validation; no Job was created.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No resource exists with the given id.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request conflicts with the resource's current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Something failed that the caller cannot correct.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProtoError> for ServerError {
    fn from(err: ProtoError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<OrchestratorError> for ServerError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(e) => Self::InvalidRequest(e.to_string()),
            OrchestratorError::NotFound(id) => Self::NotFound(id),
            OrchestratorError::AlreadyTerminal(id) => Self::Conflict(format!("job {id} is already terminal")),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Self::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        let body = ErrorBody { error: kind.to_string(), message: self.to_string() };
        let json = serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string());
        (status, [("content-type", "application/json")], json).into_response()
    }
}
