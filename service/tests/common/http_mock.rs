//! HTTP mock server helpers for testing outbound HTTP calls.
//!
//! A thin re-export of `wiremock` for stubbing the Notion token endpoint.
//!
//! # Patterns
//!
//! - **Success response**: `ResponseTemplate::new(200).set_body_json(value)`
//! - **Error response**: `ResponseTemplate::new(400).set_body_json(error)`
//! - **Timeout simulation**: `.set_delay(Duration::from_secs(30))`
//! - **Request verification**: `.expect(1)` to assert call count

pub use wiremock::matchers::{basic_auth, body_json, header, method, path};
pub use wiremock::MockServer;
pub use wiremock::{Mock, ResponseTemplate};
