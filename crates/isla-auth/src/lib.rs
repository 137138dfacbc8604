//! Request authentication and replay protection for the Isla Reader server
//!
//! This crate holds the decision logic behind key issuance and the Notion
//! OAuth relay. It performs no I/O: callers hand in request fields and get an
//! accept/reject decision back.
//!
//! - [`SignatureVerifier`] checks the HMAC-SHA256 signature and timestamp
//!   freshness of a [`SignedRequest`].
//! - [`NonceStore`] rejects a nonce seen again inside its TTL window.
//! - [`RequestAuthenticator`] runs both, in that order.
//! - [`StateReplayGuard`] and [`EphemeralSessionCache`] back the browser
//!   redirect flow, composed by [`OAuthHandoff`].
//!
//! All stores are in-memory and bounded. A restart forgets every nonce,
//! state and pending session.
#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

mod authenticator;
mod error;
mod handoff;
mod nonce;
mod session;
mod signature;
mod state;

pub use authenticator::{AuthenticatedClient, AuthenticatorConfig, RequestAuthenticator};
pub use error::AuthError;
pub use handoff::{OAuthHandoff, TokenPayload};
pub use nonce::{NonceStore, DEFAULT_MAX_NONCES, MAX_NONCE_LENGTH};
pub use session::{EphemeralSessionCache, DEFAULT_MAX_SESSIONS, SESSION_TTL};
pub use signature::{
    constant_time_eq, hmac_sha256_hex, sign_request, verify_hmac_hex, SignatureVerifier,
    SignedRequest,
};
pub use state::{validate_state_format, StateReplayGuard, DEFAULT_MAX_STATES, STATE_TTL};
