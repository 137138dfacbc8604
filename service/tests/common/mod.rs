//! Common test utilities for integration tests.
//!
//! - [`app_builder::TestAppBuilder`] - Build test Axum apps that mirror main.rs wiring
//! - [`http_mock`] - `wiremock` re-exports for stubbing the Notion token endpoint
//!
//! ```ignore
//! use crate::common::app_builder::TestAppBuilder;
//!
//! #[tokio::test]
//! async fn test_with_app() {
//!     let app = TestAppBuilder::new().build();
//!     let (status, _, body) = send(&app, get("/health")).await;
//! }
//! ```

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

pub mod app_builder;
pub mod http_mock;

use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, HeaderMap, Method, Request, StatusCode},
};
use chrono::Utc;
use isla_auth::SignedRequest;
use serde_json::Value;
use tower::ServiceExt;

use app_builder::{TestApp, CLIENT_ID, CLIENT_SECRET};

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

/// Send a request through the app and collect status, headers and body.
pub async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    (status, headers, body.to_vec())
}

pub async fn send_json(app: &TestApp, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let (status, headers, body) = send(app, request).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, headers, json)
}

/// Signed request fields for the configured test client, stamped now.
pub fn signed_fields(nonce: &str) -> Value {
    let request = SignedRequest::signed(
        CLIENT_SECRET.as_bytes(),
        CLIENT_ID,
        nonce,
        Utc::now().timestamp(),
    );
    serde_json::to_value(request).expect("serialize")
}

/// Merge extra fields into a signed request body.
pub fn with_fields(mut base: Value, extra: &Value) -> Value {
    if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    base
}
