//! HMAC-SHA256 request signing and verification.
//!
//! A signed request proves knowledge of the shared client secret over the
//! canonical message:
//! ```text
//! {client_id}.{nonce}.{timestamp}
//! ```
//! The signature travels as 64 lowercase hex characters.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Hex length of an HMAC-SHA256 tag.
const SIGNATURE_HEX_LEN: usize = 64;

/// Fields a client sends to authenticate a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRequest {
    pub client_id: String,
    pub nonce: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Lowercase hex HMAC-SHA256 of [`SignedRequest::signing_message`].
    pub signature: String,
}

impl SignedRequest {
    /// Build a request and sign it with `secret`.
    #[must_use]
    pub fn signed(
        secret: &[u8],
        client_id: impl Into<String>,
        nonce: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        let client_id = client_id.into();
        let nonce = nonce.into();
        let signature = sign_request(secret, &client_id, &nonce, timestamp);
        Self {
            client_id,
            nonce,
            timestamp,
            signature,
        }
    }

    /// The canonical message covered by the signature.
    #[must_use]
    pub fn signing_message(&self) -> String {
        canonical_message(&self.client_id, &self.nonce, self.timestamp)
    }
}

fn canonical_message(client_id: &str, nonce: &str, timestamp: i64) -> String {
    format!("{client_id}.{nonce}.{timestamp}")
}

// `new_from_slice` can only fail for fixed-size keys; HMAC pads or hashes any length.
#[allow(clippy::expect_used)]
fn keyed_mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size")
}

/// Lowercase hex HMAC-SHA256 of `message` under `secret`.
#[must_use]
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> String {
    let mut mac = keyed_mac(secret);
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Compute the signature a client attaches to a request.
#[must_use]
pub fn sign_request(secret: &[u8], client_id: &str, nonce: &str, timestamp: i64) -> String {
    hmac_sha256_hex(
        secret,
        canonical_message(client_id, nonce, timestamp).as_bytes(),
    )
}

/// Check a lowercase hex HMAC-SHA256 tag in constant time.
///
/// Anything other than exactly 64 lowercase hex digits is rejected before
/// the MAC is computed, so two spellings of the same bytes never both verify.
#[must_use]
pub fn verify_hmac_hex(secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    if signature_hex.len() != SIGNATURE_HEX_LEN
        || !signature_hex
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return false;
    }
    let Ok(tag) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = keyed_mac(secret);
    mac.update(message);
    mac.verify_slice(&tag).is_ok()
}

/// Compare two shared secrets without short-circuiting on the first
/// differing byte. Lengths are not hidden.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Stateless verifier for one configured client.
///
/// Checks, in order: client id, timestamp freshness, signature. It keeps no
/// record of what it has seen; replay detection is [`crate::NonceStore`]'s job.
#[derive(Clone)]
pub struct SignatureVerifier {
    expected_client_id: String,
    secret: Vec<u8>,
    ttl_seconds: u64,
}

impl SignatureVerifier {
    #[must_use]
    pub fn new(
        expected_client_id: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        ttl_seconds: u64,
    ) -> Self {
        Self {
            expected_client_id: expected_client_id.into(),
            secret: secret.into(),
            ttl_seconds,
        }
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Verify `request` against the current wall clock.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidClient`] if the client id does not match
    /// - [`AuthError::Expired`] if the timestamp is more than the TTL away from now
    /// - [`AuthError::BadSignature`] if the signature does not match
    pub fn verify(&self, request: &SignedRequest) -> Result<(), AuthError> {
        self.verify_at(request, chrono::Utc::now().timestamp())
    }

    /// Verify `request` as of `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Same as [`SignatureVerifier::verify`].
    pub fn verify_at(&self, request: &SignedRequest, now: i64) -> Result<(), AuthError> {
        if request.client_id != self.expected_client_id {
            return Err(AuthError::InvalidClient);
        }

        if now.abs_diff(request.timestamp) > self.ttl_seconds {
            return Err(AuthError::Expired);
        }

        if !verify_hmac_hex(
            &self.secret,
            request.signing_message().as_bytes(),
            &request.signature,
        ) {
            return Err(AuthError::BadSignature);
        }

        Ok(())
    }
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("expected_client_id", &self.expected_client_id)
            .field("secret", &"[redacted]")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}
