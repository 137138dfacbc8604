//! Response header policy.
//!
//! Every response gets `Cache-Control: no-store`: tokens, session ids and
//! dashboard data must never land in a shared cache. The protective headers
//! (CSP, HSTS, X-Frame-Options and friends) are added on top when
//! `security_headers.enabled` is set.

use std::sync::Arc;

use axum::{
    extract::Request,
    http::{
        header::{
            HeaderName, CACHE_CONTROL, CONTENT_SECURITY_POLICY, REFERRER_POLICY,
            STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS, X_XSS_PROTECTION,
        },
        HeaderMap, HeaderValue,
    },
    middleware::Next,
    response::Response,
    Extension,
};

use crate::config::SecurityHeadersConfig;

fn hsts_value(config: &SecurityHeadersConfig) -> Option<String> {
    if !config.hsts_enabled {
        return None;
    }
    let mut value = format!("max-age={}", config.hsts_max_age);
    if config.hsts_include_subdomains {
        value.push_str("; includeSubDomains");
    }
    Some(value)
}

/// Build the default response headers from configuration.
///
/// The map is shared across requests through an `Extension` layer. Values
/// that are not valid header text are skipped with a warning.
#[must_use]
pub fn build_security_headers(config: &SecurityHeadersConfig) -> Arc<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    if !config.enabled {
        return Arc::new(headers);
    }

    let configured: [(HeaderName, Option<String>); 6] = [
        (X_CONTENT_TYPE_OPTIONS, Some("nosniff".to_string())),
        (X_XSS_PROTECTION, Some("1; mode=block".to_string())),
        (X_FRAME_OPTIONS, Some(config.frame_options.clone())),
        (CONTENT_SECURITY_POLICY, Some(config.content_security_policy.clone())),
        (REFERRER_POLICY, Some(config.referrer_policy.clone())),
        (STRICT_TRANSPORT_SECURITY, hsts_value(config)),
    ];

    for (name, value) in configured {
        let Some(value) = value else { continue };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(name, value);
            }
            Err(_) => tracing::warn!(header = %name, "ignoring invalid header value"),
        }
    }

    Arc::new(headers)
}

/// Fill in the default headers on every response.
///
/// Headers the handler already set are left alone, so an explicit
/// `Cache-Control` on a response wins over the `no-store` default.
pub async fn security_headers_middleware(
    Extension(headers): Extension<Arc<HeaderMap>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let response_headers = response.headers_mut();
    for (name, value) in headers.iter() {
        if !response_headers.contains_key(name) {
            response_headers.insert(name.clone(), value.clone());
        }
    }
    response
}
