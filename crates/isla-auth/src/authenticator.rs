//! End-to-end decision for signed API calls.

use std::fmt;

use crate::{AuthError, NonceStore, SignatureVerifier, SignedRequest, DEFAULT_MAX_NONCES};

/// Settings for a [`RequestAuthenticator`].
#[derive(Clone)]
pub struct AuthenticatorConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Freshness window in seconds, also the nonce retention window.
    pub ttl_seconds: u64,
    pub max_nonces: usize,
}

impl AuthenticatorConfig {
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            ttl_seconds: 300,
            max_nonces: DEFAULT_MAX_NONCES,
        }
    }
}

impl fmt::Debug for AuthenticatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("max_nonces", &self.max_nonces)
            .finish()
    }
}

/// Identity of a caller that passed [`RequestAuthenticator::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    pub client_id: String,
    pub nonce: String,
}

/// Signature check followed by nonce replay check.
///
/// Used by the key-issuance and OAuth code-exchange endpoints. The nonce is
/// only recorded once the signature is valid, so unauthenticated callers
/// cannot fill the nonce store.
#[derive(Debug)]
pub struct RequestAuthenticator {
    verifier: SignatureVerifier,
    nonces: NonceStore,
}

impl RequestAuthenticator {
    #[must_use]
    pub fn new(config: AuthenticatorConfig) -> Self {
        Self {
            verifier: SignatureVerifier::new(
                config.client_id,
                config.client_secret.into_bytes(),
                config.ttl_seconds,
            ),
            nonces: NonceStore::new(config.max_nonces),
        }
    }

    /// Build from an existing verifier and nonce store.
    #[must_use]
    pub const fn from_parts(verifier: SignatureVerifier, nonces: NonceStore) -> Self {
        Self { verifier, nonces }
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> u64 {
        self.verifier.ttl_seconds()
    }

    #[must_use]
    pub const fn nonce_store(&self) -> &NonceStore {
        &self.nonces
    }

    /// Accept or reject `request`, short-circuiting on the first failure.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidClient`], [`AuthError::Expired`] or
    ///   [`AuthError::BadSignature`] from signature verification
    /// - [`AuthError::InvalidFormat`] or [`AuthError::Replayed`] from the nonce check
    pub fn authenticate(&self, request: &SignedRequest) -> Result<AuthenticatedClient, AuthError> {
        self.authenticate_at(request, chrono::Utc::now().timestamp())
    }

    pub(crate) fn authenticate_at(
        &self,
        request: &SignedRequest,
        now: i64,
    ) -> Result<AuthenticatedClient, AuthError> {
        self.verifier.verify_at(request, now)?;
        self.nonces.check_and_record_at(
            &request.nonce,
            request.timestamp,
            self.verifier.ttl_seconds(),
            now,
        )?;

        Ok(AuthenticatedClient {
            client_id: request.client_id.clone(),
            nonce: request.nonce.clone(),
        })
    }
}
