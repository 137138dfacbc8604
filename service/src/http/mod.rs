//! HTTP utilities and middleware.
//!
//! This module provides shared HTTP functionality used by the application server.

pub mod security;
pub mod transport;

pub use security::{build_security_headers, security_headers_middleware};
pub use transport::{require_https_middleware, TransportPolicy};

use axum::{
    http::{header::CACHE_CONTROL, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use isla_auth::AuthError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON error body shared by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: String,
    /// Human-readable explanation
    pub message: String,
}

/// Build an error response with the given status, code and message.
pub fn error_response(status: StatusCode, error: &str, message: &str) -> Response {
    (
        status,
        [(CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Map an auth-core rejection to `401 Unauthorized`.
pub fn unauthorized(err: AuthError) -> Response {
    error_response(StatusCode::UNAUTHORIZED, err.code(), &err.to_string())
}

pub fn internal_error() -> Response {
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Internal server error",
    )
}
