//! Notion OAuth relay tests: browser callback, one-time finalize and the
//! signed code exchange, with the token endpoint mocked.

mod common;

use std::collections::HashMap;

use axum::http::{
    header::{CACHE_CONTROL, LOCATION},
    HeaderMap, StatusCode,
};
use common::{
    app_builder::{TestApp, TestAppBuilder, NOTION_REDIRECT_URI},
    get, post_json, send, send_json, signed_fields, with_fields,
};
use reqwest::Url;
use serde_json::{json, Value};

fn notion_payload() -> Value {
    json!({
        "access_token": "secret-access-token",
        "workspace_id": "workspace-123",
        "workspace_name": "Workspace Name",
        "bot_id": "bot-123",
        "owner": {"type": "user", "user": {"id": "user-1"}}
    })
}

/// Parse the app deep link in a 302 response.
fn redirect(status: StatusCode, headers: &HeaderMap) -> (String, HashMap<String, String>) {
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-store");
    let location = Url::parse(headers.get(LOCATION).unwrap().to_str().unwrap()).unwrap();
    assert_eq!(location.scheme(), "lanread");
    assert_eq!(location.host_str(), Some("notion"));
    let query = location.query_pairs().into_owned().collect();
    (location.path().to_string(), query)
}

async fn callback(app: &TestApp, query: &str) -> (String, HashMap<String, String>) {
    let (status, headers, _) = send(app, get(&format!("/notion/callback?{query}"))).await;
    redirect(status, &headers)
}

async fn finalize(app: &TestApp, session_id: &str) -> (StatusCode, Value) {
    let (status, _, body) = send_json(
        app,
        post_json("/v1/oauth/finalize", &json!({"session_id": session_id})),
    )
    .await;
    (status, body)
}

// =============================================================================
// Callback Tests
// =============================================================================

#[tokio::test]
async fn test_callback_success_and_finalize_is_one_time() {
    let app = TestAppBuilder::new().build();
    app.notion.respond_with(200, notion_payload());

    let (path, query) = callback(&app, "code=oauth-code&state=stateAbc123XYZ").await;

    assert_eq!(path, "/finish");
    assert_eq!(query["state"], "stateAbc123XYZ");
    let session_id = &query["session"];
    assert!(uuid::Uuid::parse_str(session_id).is_ok());
    assert_eq!(
        app.notion.calls(),
        vec![("oauth-code".to_string(), NOTION_REDIRECT_URI.to_string())]
    );

    let (status, body) = finalize(&app, session_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, notion_payload());

    let (status, body) = finalize(&app, session_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"error": "session_expired", "message": "Session not found or expired"})
    );
}

#[tokio::test]
async fn test_callback_rejects_invalid_state() {
    let app = TestAppBuilder::new().build();

    for query in ["code=oauth-code&state=bad%20state", "code=oauth-code&state=short", "code=oauth-code"] {
        let (path, params) = callback(&app, query).await;
        assert_eq!(path, "/error", "{query}");
        assert_eq!(params["msg"], "Invalid OAuth state");
        // A rejected state is never echoed.
        assert!(!params.contains_key("state"));
    }
    assert!(app.notion.calls().is_empty());
}

#[tokio::test]
async fn test_callback_state_is_single_use() {
    let app = TestAppBuilder::new().build();

    let (first, _) = callback(&app, "code=a&state=stateAbc123XYZ").await;
    let (second, params) = callback(&app, "code=b&state=stateAbc123XYZ").await;

    assert_eq!(first, "/finish");
    assert_eq!(second, "/error");
    assert_eq!(params["msg"], "Invalid OAuth state");
    assert_eq!(app.notion.calls().len(), 1);
}

#[tokio::test]
async fn test_callback_trims_state() {
    let app = TestAppBuilder::new().build();

    let (path, params) = callback(&app, "code=a&state=%20stateAbc123XYZ%20").await;

    assert_eq!(path, "/finish");
    assert_eq!(params["state"], "stateAbc123XYZ");
}

#[tokio::test]
async fn test_callback_missing_code() {
    let app = TestAppBuilder::new().build();

    let (path, params) = callback(&app, "state=stateAbc123XYZ").await;

    assert_eq!(path, "/error");
    assert_eq!(params["msg"], "Missing authorization code");
    assert_eq!(params["state"], "stateAbc123XYZ");
}

#[tokio::test]
async fn test_callback_without_credentials() {
    let app = TestAppBuilder::new().without_notion_credentials().build();

    let (path, params) = callback(&app, "code=a&state=stateAbc123XYZ").await;

    assert_eq!(path, "/error");
    assert_eq!(params["msg"], "Server OAuth configuration is incomplete");
    assert!(app.notion.calls().is_empty());
}

#[tokio::test]
async fn test_callback_when_notion_rejects_code() {
    let app = TestAppBuilder::new().build();
    app.notion.respond_with(
        400,
        json!({"error": "invalid_grant", "error_description": "Authorization code is invalid"}),
    );

    let (path, params) = callback(&app, "code=a&state=stateAbc123XYZ").await;

    assert_eq!(path, "/error");
    assert_eq!(
        params["msg"],
        "Notion OAuth failed: Authorization code is invalid"
    );
    assert!(app.state.handoff.finalize("anything").is_err());
}

#[tokio::test]
async fn test_callback_when_notion_unreachable() {
    let app = TestAppBuilder::new().build();
    app.notion.fail_with_network_error();

    let (path, params) = callback(&app, "code=a&state=stateAbc123XYZ").await;

    assert_eq!(path, "/error");
    assert_eq!(params["msg"], "Failed to reach Notion API");
}

#[tokio::test]
async fn test_callback_requires_access_token() {
    let app = TestAppBuilder::new().build();
    app.notion.respond_with(200, json!({"workspace_id": "w"}));

    let (path, params) = callback(&app, "code=a&state=stateAbc123XYZ").await;

    assert_eq!(path, "/error");
    assert_eq!(params["msg"], "Notion response missing access_token");
}

#[tokio::test]
async fn test_callback_error_message_is_collapsed_and_truncated() {
    let app = TestAppBuilder::new().build();
    let noisy = format!("line one\n\n  line   two {}", "x".repeat(400));
    app.notion.respond_with(500, json!({"message": noisy}));

    let (_, params) = callback(&app, "code=a&state=stateAbc123XYZ").await;

    let msg = &params["msg"];
    assert!(msg.starts_with("Notion OAuth failed: line one line two x"));
    assert_eq!(msg.chars().count(), 180);
}

#[tokio::test]
async fn test_callback_rebuilds_redirect_uri_from_forwarded_headers() {
    let app = TestAppBuilder::new()
        .with_config(|c| c.notion.redirect_uri = None)
        .build();

    let request = axum::http::Request::builder()
        .uri("/notion/callback?code=a&state=stateAbc123XYZ")
        .header("host", "internal:8080")
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-host", "reader.example.com")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, request).await;
    redirect(status, &headers);

    assert_eq!(
        app.notion.calls()[0].1,
        "https://reader.example.com/notion/callback"
    );
}

#[tokio::test]
async fn test_custom_app_redirect_base() {
    let app = TestAppBuilder::new()
        .with_config(|c| c.notion.app_redirect_base = "lanread://notion/".to_string())
        .build();

    let (path, _) = callback(&app, "code=a&state=stateAbc123XYZ").await;

    assert_eq!(path, "/finish");
}

// =============================================================================
// Finalize Tests
// =============================================================================

#[tokio::test]
async fn test_finalize_validates_session_id() {
    let app = TestAppBuilder::new().build();
    let too_long = "a".repeat(129);

    let cases = [
        ("", "invalid_session"),
        ("   ", "invalid_session"),
        (too_long.as_str(), "invalid_session"),
        ("unknown-session", "session_expired"),
    ];
    for (session_id, expected) in cases {
        let (status, body) = finalize(&app, session_id).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{session_id:?}");
        assert_eq!(body["error"], expected);
    }
}

#[tokio::test]
async fn test_finalize_trims_session_id() {
    let app = TestAppBuilder::new().build();

    let (_, query) = callback(&app, "code=a&state=stateAbc123XYZ").await;
    let (status, body) = finalize(&app, &format!("  {}  ", query["session"])).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], "mock-access-token");
}

#[tokio::test]
async fn test_finalize_after_ttl_expired() {
    let app = TestAppBuilder::new()
        .with_config(|c| c.notion.session_ttl_seconds = 1)
        .build();

    let (_, query) = callback(&app, "code=a&state=stateAbc123XYZ").await;
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    let (status, body) = finalize(&app, &query["session"]).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "session_expired");
}

// =============================================================================
// Signed Exchange Tests
// =============================================================================

fn exchange_body(nonce: &str) -> Value {
    with_fields(signed_fields(nonce), &json!({"code": "oauth-code"}))
}

#[tokio::test]
async fn test_exchange_relays_token_payload() {
    let app = TestAppBuilder::new().build();
    app.notion.respond_with(200, notion_payload());

    let (status, headers, body) =
        send_json(&app, post_json("/v1/notion/exchange", &exchange_body("ex-1"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, notion_payload());
    assert_eq!(headers.get(CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(
        app.notion.calls(),
        vec![("oauth-code".to_string(), NOTION_REDIRECT_URI.to_string())]
    );
}

#[tokio::test]
async fn test_exchange_uses_request_redirect_uri() {
    let app = TestAppBuilder::new().build();
    let body = with_fields(
        exchange_body("ex-2"),
        &json!({"redirect_uri": "https://app.example/cb"}),
    );

    let (status, _, _) = send_json(&app, post_json("/v1/notion/exchange", &body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.notion.calls()[0].1, "https://app.example/cb");
}

#[tokio::test]
async fn test_exchange_authenticates_before_calling_notion() {
    let app = TestAppBuilder::new().build();
    let mut body = exchange_body("ex-3");
    body["signature"] = json!("0".repeat(64));

    let (status, _, error) = send_json(&app, post_json("/v1/notion/exchange", &body)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["error"], "invalid_signature");
    assert!(app.notion.calls().is_empty());
}

#[tokio::test]
async fn test_exchange_replay_rejected() {
    let app = TestAppBuilder::new().build();
    let body = exchange_body("ex-4");

    let (first, _, _) = send_json(&app, post_json("/v1/notion/exchange", &body)).await;
    let (second, _, error) = send_json(&app, post_json("/v1/notion/exchange", &body)).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::UNAUTHORIZED);
    assert_eq!(error["error"], "replayed");
    assert_eq!(app.notion.calls().len(), 1);
}

#[tokio::test]
async fn test_exchange_upstream_failures() {
    let app = TestAppBuilder::new().build();

    app.notion
        .respond_with(400, json!({"error": "invalid_grant"}));
    let (status, _, body) =
        send_json(&app, post_json("/v1/notion/exchange", &exchange_body("ex-5"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "upstream_rejected");
    assert_eq!(body["message"], "Notion OAuth failed: invalid_grant");

    app.notion.fail_with_network_error();
    let (status, _, body) =
        send_json(&app, post_json("/v1/notion/exchange", &exchange_body("ex-6"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "upstream_unreachable");
}

#[tokio::test]
async fn test_exchange_without_credentials() {
    let app = TestAppBuilder::new().without_notion_credentials().build();

    let (status, _, body) =
        send_json(&app, post_json("/v1/notion/exchange", &exchange_body("ex-7"))).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "oauth_not_configured");
    assert!(app.notion.calls().is_empty());
}

#[tokio::test]
async fn test_exchange_requires_code_and_redirect_uri() {
    let app = TestAppBuilder::new()
        .with_config(|c| c.notion.redirect_uri = None)
        .build();

    let body = with_fields(signed_fields("ex-8"), &json!({"code": "  "}));
    let (status, _, error) = send_json(&app, post_json("/v1/notion/exchange", &body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["message"], "Missing authorization code");

    let (status, _, error) =
        send_json(&app, post_json("/v1/notion/exchange", &exchange_body("ex-9"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["message"], "redirect_uri is required");
    assert!(app.notion.calls().is_empty());
}
