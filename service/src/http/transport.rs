//! HTTPS enforcement for deployments behind a TLS-terminating proxy.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Extension,
};

use super::error_response;

/// Whether plain-HTTP requests are refused.
#[derive(Debug, Clone, Copy)]
pub struct TransportPolicy {
    pub require_https: bool,
}

/// First value of a possibly comma-separated forwarding header.
#[must_use]
pub fn forwarded_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn is_https(request: &Request) -> bool {
    request.uri().scheme_str() == Some("https")
        || forwarded_value(request.headers(), "x-forwarded-proto")
            .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Reject requests that did not arrive over HTTPS when the policy requires it.
pub async fn require_https_middleware(
    Extension(policy): Extension<TransportPolicy>,
    request: Request,
    next: Next,
) -> Response {
    if policy.require_https && !is_https(&request) {
        tracing::debug!(path = %request.uri().path(), "rejected plain-HTTP request");
        return error_response(
            StatusCode::BAD_REQUEST,
            "https_required",
            "HTTPS is required for this endpoint",
        );
    }
    next.run(request).await
}
