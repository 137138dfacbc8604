//! Signed dashboard session cookies.
//!
//! Token format: `{username}.{expires_at}.{hmac_hex}`, where the HMAC-SHA256
//! covers `{username}.{expires_at}` under the dashboard secret.

use isla_auth::{hmac_sha256_hex, verify_hmac_hex};
use thiserror::Error;

pub const SESSION_COOKIE: &str = "metrics_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DashboardSessionError {
    #[error("Not authenticated")]
    Missing,
    #[error("Invalid session")]
    Invalid,
    #[error("Session expired")]
    Expired,
}

/// Issue a token for `username` valid until `now + ttl_seconds`.
#[must_use]
pub fn make_session_token(username: &str, secret: &str, ttl_seconds: u64, now: i64) -> String {
    let expires_at = now.saturating_add(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
    let payload = format!("{username}.{expires_at}");
    let signature = hmac_sha256_hex(secret.as_bytes(), payload.as_bytes());
    format!("{payload}.{signature}")
}

/// Check a token and return the username it was issued to.
///
/// # Errors
///
/// [`DashboardSessionError::Invalid`] for a malformed or forged token,
/// [`DashboardSessionError::Expired`] once `now` is past its expiry.
pub fn verify_session_token(
    token: &str,
    secret: &str,
    now: i64,
) -> Result<String, DashboardSessionError> {
    let (payload, signature) = token
        .rsplit_once('.')
        .ok_or(DashboardSessionError::Invalid)?;
    if !verify_hmac_hex(secret.as_bytes(), payload.as_bytes(), signature) {
        return Err(DashboardSessionError::Invalid);
    }

    let (username, expires_at) = payload
        .rsplit_once('.')
        .ok_or(DashboardSessionError::Invalid)?;
    let expires_at: i64 = expires_at
        .parse()
        .map_err(|_| DashboardSessionError::Invalid)?;

    if now > expires_at {
        return Err(DashboardSessionError::Expired);
    }
    Ok(username.to_string())
}

/// `Set-Cookie` value carrying a fresh session.
#[must_use]
pub fn session_cookie(token: &str, max_age: u64, secure: bool) -> String {
    let mut cookie =
        format!("{SESSION_COOKIE}={token}; Max-Age={max_age}; Path=/; HttpOnly; SameSite=Lax");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value that removes the session.
#[must_use]
pub fn clear_session_cookie(secure: bool) -> String {
    session_cookie("", 0, secure)
}

/// Value of the session cookie in a `Cookie` request header.
#[must_use]
pub fn find_session_cookie(cookie_header: &str) -> Option<&str> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}
