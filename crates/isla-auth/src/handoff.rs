//! One-time token handoff for the OAuth browser redirect flow.
//!
//! ```text
//! AwaitingCallback --state ok, exchange ok--> SessionStored --finalize--> Consumed
//!        |                                         |
//!        +--bad state / code / exchange--> Rejected +--TTL elapses--> Expired
//! ```
//!
//! `Consumed` and `Expired` look the same to a finalize caller.

use std::time::Duration;

use uuid::Uuid;

use crate::{
    AuthError, EphemeralSessionCache, StateReplayGuard, DEFAULT_MAX_SESSIONS, DEFAULT_MAX_STATES,
    SESSION_TTL, STATE_TTL,
};

/// Token response relayed from the OAuth provider.
pub type TokenPayload = serde_json::Map<String, serde_json::Value>;

/// Longest session id accepted at finalize, in characters.
const MAX_SESSION_ID_LENGTH: usize = 128;

/// State guard plus session cache behind the callback/finalize endpoint pair.
#[derive(Debug)]
pub struct OAuthHandoff {
    states: StateReplayGuard,
    sessions: EphemeralSessionCache<TokenPayload>,
    session_ttl: Duration,
}

impl OAuthHandoff {
    #[must_use]
    pub const fn new(
        states: StateReplayGuard,
        sessions: EphemeralSessionCache<TokenPayload>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            states,
            sessions,
            session_ttl,
        }
    }

    #[must_use]
    pub const fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Validate and consume the `state` carried by a provider callback.
    ///
    /// Returns the trimmed state value to echo back to the app.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidFormat`] or [`AuthError::Replayed`] from [`StateReplayGuard`].
    pub fn accept_callback(&self, state: Option<&str>) -> Result<String, AuthError> {
        let state = state.map(str::trim).unwrap_or_default();
        self.states.validate_and_mark(state)?;
        Ok(state.to_string())
    }

    /// Park the provider's token payload and return the session id the app
    /// will redeem it with.
    #[must_use]
    pub fn store(&self, payload: TokenPayload) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions
            .put(&session_id.to_string(), payload, self.session_ttl);
        session_id
    }

    /// Redeem a session id exactly once.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidFormat`] if the trimmed id is empty or too long
    /// - [`AuthError::SessionExpiredOrMissing`] if the id is unknown, expired
    ///   or already redeemed
    pub fn finalize(&self, session_id: &str) -> Result<TokenPayload, AuthError> {
        let session_id = session_id.trim();
        if session_id.is_empty() || session_id.chars().count() > MAX_SESSION_ID_LENGTH {
            return Err(AuthError::InvalidFormat);
        }
        self.sessions
            .take(session_id)
            .ok_or(AuthError::SessionExpiredOrMissing)
    }

    /// Park a payload under a caller-chosen id.
    pub fn store_as(&self, session_id: &str, payload: TokenPayload, ttl: Duration) {
        self.sessions.put(session_id, payload, ttl);
    }

    /// Forget all states and pending sessions.
    pub fn clear(&self) {
        self.states.clear();
        self.sessions.clear();
    }
}

impl Default for OAuthHandoff {
    fn default() -> Self {
        Self::new(
            StateReplayGuard::new(STATE_TTL, DEFAULT_MAX_STATES),
            EphemeralSessionCache::new(DEFAULT_MAX_SESSIONS),
            SESSION_TTL,
        )
    }
}
