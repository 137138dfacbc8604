//! In-memory nonce store for replay prevention.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::AuthError;

/// Default cap on remembered nonces.
pub const DEFAULT_MAX_NONCES: usize = 10_000;

/// Maximum nonce length to prevent memory abuse.
pub const MAX_NONCE_LENGTH: usize = 256;

/// Bounded store of recently seen request nonces.
///
/// Each nonce is remembered with the timestamp of the request that carried
/// it. An entry stays "hot" while its timestamp is inside the TTL window; a
/// second use while hot is a replay. Expired entries are swept on every call,
/// and when the store is over capacity the entries with the oldest request
/// timestamps go first.
#[derive(Debug)]
pub struct NonceStore {
    seen: Mutex<HashMap<String, i64>>,
    max_entries: usize,
}

impl NonceStore {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Record `nonce` if it is not already hot.
    ///
    /// The sweep, the presence check and the insert happen under one lock, so
    /// two concurrent requests with the same nonce cannot both succeed.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidFormat`] for an empty or oversized nonce
    /// - [`AuthError::Replayed`] if the nonce is still inside its TTL window,
    ///   or the store lock is poisoned
    pub fn check_and_record(
        &self,
        nonce: &str,
        timestamp: i64,
        ttl_seconds: u64,
    ) -> Result<(), AuthError> {
        self.check_and_record_at(nonce, timestamp, ttl_seconds, chrono::Utc::now().timestamp())
    }

    pub(crate) fn check_and_record_at(
        &self,
        nonce: &str,
        timestamp: i64,
        ttl_seconds: u64,
        now: i64,
    ) -> Result<(), AuthError> {
        if nonce.is_empty() || nonce.len() > MAX_NONCE_LENGTH {
            return Err(AuthError::InvalidFormat);
        }

        let Ok(mut seen) = self.seen.lock() else {
            // A previous holder panicked. Reject rather than risk accepting a replay.
            tracing::error!("nonce store lock poisoned; rejecting request");
            return Err(AuthError::Replayed);
        };

        let cutoff = now.saturating_sub(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
        seen.retain(|_, &mut seen_at| seen_at >= cutoff);

        if seen.contains_key(nonce) {
            return Err(AuthError::Replayed);
        }

        seen.insert(nonce.to_string(), timestamp);
        self.evict_overflow(&mut seen);
        Ok(())
    }

    fn evict_overflow(&self, seen: &mut HashMap<String, i64>) {
        let overflow = seen.len().saturating_sub(self.max_entries);
        if overflow == 0 {
            return;
        }

        let mut by_age: Vec<(i64, String)> = seen
            .iter()
            .map(|(nonce, &seen_at)| (seen_at, nonce.clone()))
            .collect();
        by_age.sort_unstable();
        for (_, nonce) in by_age.into_iter().take(overflow) {
            seen.remove(&nonce);
        }
        tracing::debug!(evicted = overflow, "nonce store over capacity");
    }

    /// Number of remembered nonces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().map_or(0, |seen| seen.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every nonce.
    pub fn clear(&self) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.clear();
        }
    }
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NONCES)
    }
}
