//! Short-lived, read-once session handoff cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lifetime of an OAuth handoff session.
pub const SESSION_TTL: Duration = Duration::from_secs(60);

/// Default cap on pending sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

struct SessionEntry<V> {
    expires_at: Instant,
    payload: V,
}

/// Bounded cache mapping opaque session ids to one-time payloads.
///
/// [`EphemeralSessionCache::take`] removes the entry it returns, so each
/// payload is handed out at most once. Expired entries are swept on every
/// call; past capacity, the entries closest to expiry are dropped first.
pub struct EphemeralSessionCache<V> {
    entries: Mutex<HashMap<String, SessionEntry<V>>>,
    max_entries: usize,
}

impl<V> EphemeralSessionCache<V> {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Store `payload` under `session_id`, replacing any existing entry.
    pub fn put(&self, session_id: &str, payload: V, ttl: Duration) {
        self.put_at(session_id, payload, ttl, Instant::now());
    }

    pub(crate) fn put_at(&self, session_id: &str, payload: V, ttl: Duration, now: Instant) {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::error!("session cache lock poisoned; dropping session");
            return;
        };

        Self::prune_expired(&mut entries, now);
        let Some(expires_at) = now.checked_add(ttl) else {
            // Unrepresentable expiry; treat the session as already expired.
            tracing::warn!(ttl_secs = ttl.as_secs(), "session ttl out of range; dropping session");
            entries.remove(session_id);
            return;
        };
        entries.insert(
            session_id.to_string(),
            SessionEntry {
                expires_at,
                payload,
            },
        );

        let overflow = entries.len().saturating_sub(self.max_entries);
        if overflow > 0 {
            let mut by_expiry: Vec<(Instant, String)> = entries
                .iter()
                .map(|(id, entry)| (entry.expires_at, id.clone()))
                .collect();
            by_expiry.sort_unstable();
            for (_, id) in by_expiry.into_iter().take(overflow) {
                entries.remove(&id);
            }
            tracing::debug!(evicted = overflow, "session cache over capacity");
        }
    }

    /// Remove and return the payload for `session_id` if it is present and unexpired.
    ///
    /// Returns `None` for unknown, expired and already-taken ids alike.
    pub fn take(&self, session_id: &str) -> Option<V> {
        self.take_at(session_id, Instant::now())
    }

    pub(crate) fn take_at(&self, session_id: &str, now: Instant) -> Option<V> {
        let Ok(mut entries) = self.entries.lock() else {
            tracing::error!("session cache lock poisoned; refusing handoff");
            return None;
        };

        Self::prune_expired(&mut entries, now);
        entries.remove(session_id).map(|entry| entry.payload)
    }

    fn prune_expired(entries: &mut HashMap<String, SessionEntry<V>>, now: Instant) {
        entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of pending sessions, including ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map_or(0, |entries| entries.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending session.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

impl<V> Default for EphemeralSessionCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl<V> fmt::Debug for EphemeralSessionCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralSessionCache")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .finish_non_exhaustive()
    }
}
