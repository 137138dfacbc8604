//! Building the app deep links and the provider redirect URI.

use axum::http::{header::HOST, HeaderMap, Uri};

use crate::http::transport::forwarded_value;

/// Longest error message carried back to the app.
const MAX_MESSAGE_CHARS: usize = 180;

/// Collapse whitespace runs and cap the length of a message shown in the app.
pub fn clean_message(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_MESSAGE_CHARS).collect();
    if truncated.is_empty() {
        "Unknown error".to_string()
    } else {
        truncated
    }
}

/// `{base}/{path}?{query}`, dropping empty query values.
pub fn app_link(base: &str, path: &str, query: &[(&str, &str)]) -> String {
    let base = base.trim_end_matches('/');
    let query = query
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>();

    if query.is_empty() {
        format!("{base}/{path}")
    } else {
        format!("{base}/{path}?{}", query.join("&"))
    }
}

/// Redirect URI the provider expects in the token exchange.
///
/// A configured value wins; otherwise it is rebuilt from the forwarded
/// headers and the path the callback arrived on.
pub fn resolve_redirect_uri(configured: Option<&str>, headers: &HeaderMap, uri: &Uri) -> String {
    if let Some(configured) = configured.map(str::trim).filter(|v| !v.is_empty()) {
        return configured.to_string();
    }

    let proto = forwarded_value(headers, "x-forwarded-proto")
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");
    let host = forwarded_value(headers, "x-forwarded-host")
        .or_else(|| headers.get(HOST).and_then(|v| v.to_str().ok()))
        .or_else(|| uri.authority().map(axum::http::uri::Authority::as_str))
        .unwrap_or("localhost");

    format!("{proto}://{host}{}", uri.path())
}
