/// Reasons the auth core rejects a request.
///
/// Every variant is terminal for the request that produced it; nothing here
/// is retried. Callers map all of them to an unauthorized/rejected response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid client credentials")]
    InvalidClient,
    #[error("Request timestamp expired")]
    Expired,
    #[error("Invalid signature")]
    BadSignature,
    #[error("Request replay detected")]
    Replayed,
    #[error("Malformed token")]
    InvalidFormat,
    #[error("Session not found or expired")]
    SessionExpiredOrMissing,
}

impl AuthError {
    /// Stable machine-readable code for logs and error bodies.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidClient => "invalid_client",
            Self::Expired => "request_expired",
            Self::BadSignature => "invalid_signature",
            Self::Replayed => "replayed",
            Self::InvalidFormat => "invalid_format",
            Self::SessionExpiredOrMissing => "session_expired",
        }
    }
}
