//! Notion OAuth relay.
//!
//! Two flows share the token endpoint client:
//! - the browser redirect flow (`/notion/callback` then `/v1/oauth/finalize`),
//!   where the token payload is parked behind a one-time session id;
//! - the signed exchange (`/v1/notion/exchange`), where an authenticated app
//!   hands over the authorization code directly.

pub mod client;
pub mod handlers;
pub mod redirect;

pub use client::{HttpNotionClient, NotionClientError, NotionOAuthClient, ProviderResponse};
pub use handlers::{
    exchange, finalize, notion_callback, CallbackParams, ExchangeRequest, FinalizeRequest,
};
