//! HTTP error types and mappings.
//!
//! WebSocket-side errors travel as `error` envelopes through the response
//! queue; this type covers the plain HTTP surfaces (auth endpoints, static
//! gateway) and maps onto status codes with a JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dawn_core::ports::auth_store::AuthStoreError;
use dawn_core::ports::conversation_store::ConversationStoreError;
use serde::Serialize;
use thiserror::Error;

/// Axum-facing error type for the HTTP gateway.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (invalid input).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed (admin-only, lockout, traversal).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Too many requests from one source.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            HttpError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            HttpError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            HttpError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            HttpError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = ErrorBody {
            error: message,
            status: status.as_u16(),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<AuthStoreError> for HttpError {
    fn from(err: AuthStoreError) -> Self {
        match err {
            AuthStoreError::UserNotFound(u) => HttpError::NotFound(format!("user {u}")),
            AuthStoreError::UserExists(u) => HttpError::BadRequest(format!("user {u} exists")),
            AuthStoreError::Storage(msg) => HttpError::Internal(format!("auth store: {msg}")),
        }
    }
}

impl From<ConversationStoreError> for HttpError {
    fn from(err: ConversationStoreError) -> Self {
        match err {
            ConversationStoreError::NotFound(id) => {
                HttpError::NotFound(format!("conversation {id}"))
            }
            ConversationStoreError::Storage(msg) => {
                HttpError::Internal(format!("conversation store: {msg}"))
            }
        }
    }
}
