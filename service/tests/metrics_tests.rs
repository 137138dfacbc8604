//! Metrics ingestion and dashboard API tests.

mod common;

use axum::{
    body::Body,
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        Method, Request, StatusCode,
    },
};
use chrono::Utc;
use common::{
    app_builder::{TestApp, TestAppBuilder, DASHBOARD_PASSWORD, DASHBOARD_USER, METRICS_TOKEN},
    get, post_json, send, send_json,
};
use isla_server::metrics::MetricsStore;
use serde_json::{json, Value};

fn event(interface: &str, status: u16) -> Value {
    json!({
        "interface": interface,
        "status_code": status,
        "latency_ms": 120.456,
        "request_bytes": 2048,
        "tokens": 300,
        "retry_count": 0,
        "source": "ios",
        "request_id": "req-1"
    })
}

fn ingest_request(body: &Value, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/v1/metrics")
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header("x-metrics-key", token);
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

async fn login(app: &TestApp) -> String {
    let (status, headers, body) = send_json(
        app,
        post_json(
            "/admin/metrics/login",
            &json!({"username": DASHBOARD_USER, "password": DASHBOARD_PASSWORD}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
    cookie.split(';').next().unwrap().to_string()
}

fn with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(COOKIE, cookie)
        .body(Body::empty())
        .expect("request")
}

// =============================================================================
// Ingestion Tests
// =============================================================================

#[tokio::test]
async fn test_ingest_stores_and_persists_event() {
    let app = TestAppBuilder::new().build();

    let (status, _, body) =
        send_json(&app, ingest_request(&event("chat", 200), Some(METRICS_TOKEN))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"status": "queued"}));
    assert_eq!(app.state.metrics.len(), 1);

    let reopened = MetricsStore::open(app.metrics_dir.path().join("metrics.jsonl"), 10);
    let stored = reopened.list_recent(1);
    assert_eq!(stored[0].interface, "chat");
    assert_eq!(stored[0].tokens, Some(300));
    assert!((Utc::now() - stored[0].timestamp).num_seconds().abs() < 5);
}

#[tokio::test]
async fn test_ingest_keeps_client_timestamp() {
    let app = TestAppBuilder::new().build();
    let mut body = event("chat", 200);
    body["timestamp"] = json!("2024-06-01T12:00:00+02:00");

    let (status, _, _) = send_json(&app, ingest_request(&body, Some(METRICS_TOKEN))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        app.state.metrics.list_recent(1)[0].timestamp.to_rfc3339(),
        "2024-06-01T10:00:00+00:00"
    );
}

#[tokio::test]
async fn test_ingest_reads_naive_timestamp_as_utc() {
    let app = TestAppBuilder::new().build();
    let mut body = event("chat", 200);
    body["timestamp"] = json!("2024-06-01T12:00:00");

    let (status, _, _) = send_json(&app, ingest_request(&body, Some(METRICS_TOKEN))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        app.state.metrics.list_recent(1)[0].timestamp.to_rfc3339(),
        "2024-06-01T12:00:00+00:00"
    );
}

#[tokio::test]
async fn test_ingest_rejects_unparseable_timestamp() {
    let app = TestAppBuilder::new().build();
    let mut body = event("chat", 200);
    body["timestamp"] = json!("not-a-time");

    let (status, _, _) = send(&app, ingest_request(&body, Some(METRICS_TOKEN))).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(app.state.metrics.is_empty());
}

#[tokio::test]
async fn test_ingest_requires_token() {
    let app = TestAppBuilder::new().build();

    for token in [None, Some("wrong-token"), Some("")] {
        let (status, _, _) = send_json(&app, ingest_request(&event("chat", 200), token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{token:?}");
    }
    assert!(app.state.metrics.is_empty());
}

#[tokio::test]
async fn test_ingest_rejected_when_token_not_configured() {
    let app = TestAppBuilder::new()
        .with_config(|c| c.metrics.ingest_token = None)
        .build();

    let (status, _, _) = send_json(&app, ingest_request(&event("chat", 200), Some(""))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ingest_limits_error_reason() {
    let app = TestAppBuilder::new().build();

    let mut ok = event("chat", 500);
    ok["error_reason"] = json!("é".repeat(500));
    let mut too_long = event("chat", 500);
    too_long["error_reason"] = json!("x".repeat(501));

    let (status, _, _) = send_json(&app, ingest_request(&ok, Some(METRICS_TOKEN))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _, _) = send_json(&app, ingest_request(&too_long, Some(METRICS_TOKEN))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ingest_persist_failure_is_server_error() {
    let app = TestAppBuilder::new().build();
    // A non-empty directory at the data file path blocks the rename.
    let blocked = app.metrics_dir.path().join("metrics.jsonl");
    std::fs::create_dir_all(blocked.join("child")).unwrap();

    let (status, _, body) =
        send_json(&app, ingest_request(&event("chat", 200), Some(METRICS_TOKEN))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to persist metrics");
}

// =============================================================================
// Dashboard Session Tests
// =============================================================================

#[tokio::test]
async fn test_login_sets_session_cookie() {
    let app = TestAppBuilder::new().build();

    let (_, headers, _) = send(
        &app,
        post_json(
            "/admin/metrics/login",
            &json!({"username": DASHBOARD_USER, "password": DASHBOARD_PASSWORD}),
        ),
    )
    .await;

    let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
    assert!(cookie.starts_with("metrics_session=admin."));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Max-Age=43200"));
    assert!(!cookie.contains("Secure"));
}

#[tokio::test]
async fn test_login_cookie_secure_when_https_required() {
    let app = TestAppBuilder::new().with_https_required().build();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/admin/metrics/login")
        .header(CONTENT_TYPE, "application/json")
        .header("x-forwarded-proto", "https")
        .body(Body::from(
            json!({"username": DASHBOARD_USER, "password": DASHBOARD_PASSWORD}).to_string(),
        ))
        .unwrap();
    let (_, headers, _) = send(&app, request).await;

    assert!(headers
        .get(SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .ends_with("; Secure"));
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let app = TestAppBuilder::new().build();

    let cases = [
        json!({"username": DASHBOARD_USER, "password": "wrong"}),
        json!({"username": "root", "password": DASHBOARD_PASSWORD}),
        json!({"username": DASHBOARD_USER, "password": ""}),
    ];
    for body in cases {
        let (status, headers, _) = send(&app, post_json("/admin/metrics/login", &body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");
        assert!(headers.get(SET_COOKIE).is_none());
    }
}

#[tokio::test]
async fn test_login_disabled_without_password() {
    let app = TestAppBuilder::new()
        .with_config(|c| c.dashboard.password = None)
        .build();

    let (status, _, _) = send(
        &app,
        post_json(
            "/admin/metrics/login",
            &json!({"username": DASHBOARD_USER, "password": ""}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_requires_session() {
    let app = TestAppBuilder::new().build();

    let (status, _, body) = send_json(&app, get("/admin/metrics/me")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Not authenticated");

    let (status, _, body) = send_json(
        &app,
        with_cookie("/admin/metrics/me", "metrics_session=admin.9999999999.deadbeef"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid session");
}

#[tokio::test]
async fn test_me_with_session() {
    let app = TestAppBuilder::new().build();
    let cookie = login(&app).await;

    let (status, _, body) = send_json(&app, with_cookie("/admin/metrics/me", &cookie)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"user": "admin"}));
}

#[tokio::test]
async fn test_session_signed_with_dashboard_secret() {
    let app = TestAppBuilder::new().build();
    let cookie = login(&app).await;

    // Same cookie against an app with a different dashboard secret.
    let other = TestAppBuilder::new()
        .with_config(|c| c.dashboard.secret = Some("rotated-secret".to_string()))
        .build();
    let (status, _, _) = send(&other, with_cookie("/admin/metrics/me", &cookie)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_clears_cookie() {
    let app = TestAppBuilder::new().build();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/admin/metrics/logout")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get(SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("metrics_session=; Max-Age=0"));
}

// =============================================================================
// Dashboard Data Tests
// =============================================================================

async fn seed(app: &TestApp) {
    for (interface, status) in [("chat", 200), ("chat", 502), ("translate", 200)] {
        let (code, _, _) =
            send_json(app, ingest_request(&event(interface, status), Some(METRICS_TOKEN))).await;
        assert_eq!(code, StatusCode::ACCEPTED);
    }
}

#[tokio::test]
async fn test_data_returns_overview() {
    let app = TestAppBuilder::new().build();
    seed(&app).await;
    let cookie = login(&app).await;

    let (status, _, body) = send_json(&app, with_cookie("/admin/metrics/data", &cookie)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totals"]["count"], 3);
    assert_eq!(body["totals"]["last24h"], 3);
    assert_eq!(body["totals"]["totalTokens"], 900);
    assert_eq!(body["interfaces"][0]["name"], "chat");
    assert_eq!(body["interfaces"][0]["errors"], 1);
    assert_eq!(body["interfaces"][0]["lastStatus"], 502);
    assert_eq!(body["meta"]["recentRangeHours"], 168);
    assert_eq!(body["meta"]["rpsWindowSeconds"], 300);
    assert_eq!(body["recent"][0]["interface"], "translate");
    assert_eq!(body["recent"][0]["latencyMs"], 120.46);
}

#[tokio::test]
async fn test_events_newest_first() {
    let app = TestAppBuilder::new().build();
    seed(&app).await;
    let cookie = login(&app).await;

    let (status, _, body) = send_json(&app, with_cookie("/admin/metrics/events", &cookie)).await;

    assert_eq!(status, StatusCode::OK);
    let interfaces: Vec<&str> = body["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["interface"].as_str().unwrap())
        .collect();
    assert_eq!(interfaces, vec!["translate", "chat", "chat"]);
}

#[tokio::test]
async fn test_export_csv() {
    let app = TestAppBuilder::new().build();
    seed(&app).await;
    let cookie = login(&app).await;

    let (status, headers, body) = send(&app, with_cookie("/admin/metrics/export", &cookie)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers
        .get(CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    let expected_name = format!(
        "attachment; filename=\"metrics-last-7d-{}.csv\"",
        Utc::now().format("%Y%m%d")
    );
    assert_eq!(headers.get(CONTENT_DISPOSITION).unwrap(), expected_name.as_str());

    let csv = String::from_utf8(body).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("timestamp,interface,status_code"));
    assert!(lines[1].contains(",chat,200,120.46,2048,300,0,ios,req-1,"));
}

#[tokio::test]
async fn test_dashboard_reads_require_session() {
    let app = TestAppBuilder::new().build();

    for uri in [
        "/admin/metrics/data",
        "/admin/metrics/events",
        "/admin/metrics/export",
    ] {
        let (status, _, _) = send(&app, get(uri)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }
}
