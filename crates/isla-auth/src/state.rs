//! Replay guard for OAuth `state` values at the redirect callback.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::AuthError;

/// How long a seen state value stays blocked.
pub const STATE_TTL: Duration = Duration::from_secs(600);

/// Default cap on remembered state values.
pub const DEFAULT_MAX_STATES: usize = 10_000;

const MIN_STATE_LENGTH: usize = 8;
const MAX_STATE_LENGTH: usize = 512;

/// Check `state` against the accepted token grammar:
/// 8 to 512 characters from `A-Z a-z 0-9 . _ ~ -`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidFormat`] if the value falls outside the grammar.
pub fn validate_state_format(state: &str) -> Result<(), AuthError> {
    let len_ok = (MIN_STATE_LENGTH..=MAX_STATE_LENGTH).contains(&state.len());
    let chars_ok = state
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b'-'));
    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(AuthError::InvalidFormat)
    }
}

/// TTL-bounded set of OAuth state values already used at the callback.
#[derive(Debug)]
pub struct StateReplayGuard {
    ttl: Duration,
    seen: Mutex<HashMap<String, Instant>>,
    max_entries: usize,
}

impl StateReplayGuard {
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            seen: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Accept `state` the first time it is seen inside the TTL window.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidFormat`] if `state` fails [`validate_state_format`]
    /// - [`AuthError::Replayed`] if `state` was already used and has not aged
    ///   out, or the guard lock is poisoned
    pub fn validate_and_mark(&self, state: &str) -> Result<(), AuthError> {
        self.validate_and_mark_at(state, Instant::now())
    }

    pub(crate) fn validate_and_mark_at(&self, state: &str, now: Instant) -> Result<(), AuthError> {
        validate_state_format(state)?;

        let Ok(mut seen) = self.seen.lock() else {
            tracing::error!("state guard lock poisoned; rejecting callback");
            return Err(AuthError::Replayed);
        };

        let ttl = self.ttl;
        seen.retain(|_, seen_at| now.saturating_duration_since(*seen_at) <= ttl);

        if seen.contains_key(state) {
            return Err(AuthError::Replayed);
        }
        seen.insert(state.to_string(), now);

        let overflow = seen.len().saturating_sub(self.max_entries);
        if overflow > 0 {
            let mut by_age: Vec<(Instant, String)> = seen
                .iter()
                .map(|(value, &seen_at)| (seen_at, value.clone()))
                .collect();
            by_age.sort_unstable();
            for (_, value) in by_age.into_iter().take(overflow) {
                seen.remove(&value);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().map_or(0, |seen| seen.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every state value.
    pub fn clear(&self) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }
}

impl Default for StateReplayGuard {
    fn default() -> Self {
        Self::new(STATE_TTL, DEFAULT_MAX_STATES)
    }
}
