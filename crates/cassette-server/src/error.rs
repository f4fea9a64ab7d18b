// crates/cassette-server/src/error.rs
// ============================================================================
// Module: Server Errors
// Description: Server lifecycle errors and HTTP error responses.
// Purpose: Translate store and sandbox failures into safe HTTP statuses.
// Dependencies: axum, cassette-store, thiserror
// ============================================================================

//! ## Overview
//! [`ServerError`] covers configuration, startup and transport failures.
//! [`ApiError`] is the per-request failure: a status code plus a message that
//! is safe to show to clients. Execution, corruption and internal failures
//! never echo store details; they are logged through the audit sink instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use cassette_store::ErrorKind;
use cassette_store::StoreError;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Message returned when failure details stay server-side.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "Unexpected internal error, please check logs for more information";

// ============================================================================
// SECTION: Server Errors
// ============================================================================

/// Server lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<StoreError> for ServerError {
    fn from(error: StoreError) -> Self {
        Self::Init(error.to_string())
    }
}

// ============================================================================
// SECTION: HTTP Errors
// ============================================================================

/// Failure response for a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Client-safe message.
    pub message: String,
    /// Error kind label for audit events.
    pub kind: &'static str,
}

impl ApiError {
    /// Creates an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind,
        }
    }

    /// 400 with a validation message.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Validation.as_str(), message)
    }

    /// 404 for an unknown path.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorKind::NotFound.as_str(), message)
    }

    /// 405 for a known path with an unsupported method.
    #[must_use]
    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "method", "method not allowed")
    }

    /// 500 without details.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Internal.as_str(),
            INTERNAL_ERROR_MESSAGE,
        )
    }
}

impl From<&StoreError> for ApiError {
    fn from(error: &StoreError) -> Self {
        let kind = error.kind();
        let status = status_for_kind(kind);
        let message = match kind {
            ErrorKind::NotFound
            | ErrorKind::Validation
            | ErrorKind::Privilege
            | ErrorKind::Capacity
            | ErrorKind::Conflict => error.to_string(),
            ErrorKind::Execution | ErrorKind::Corruption | ErrorKind::Internal => {
                INTERNAL_ERROR_MESSAGE.to_string()
            }
        };
        Self::new(status, kind.as_str(), message)
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        Self::from(&error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = format!("{}\n", self.message);
        (self.status, [(CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
    }
}

/// Maps an error kind onto its HTTP status.
#[must_use]
pub const fn status_for_kind(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Privilege => StatusCode::FORBIDDEN,
        ErrorKind::Capacity => StatusCode::PAYLOAD_TOO_LARGE,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Execution => StatusCode::BAD_GATEWAY,
        ErrorKind::Corruption | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
