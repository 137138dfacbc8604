//! Metrics ingestion and the cookie-authenticated dashboard API.

use axum::{
    extract::{Extension, FromRequestParts},
    http::{
        header::{CONTENT_DISPOSITION, CONTENT_TYPE, COOKIE, SET_COOKIE},
        request::Parts,
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use isla_auth::constant_time_eq;
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use super::session::{
    clear_session_cookie, find_session_cookie, make_session_token, session_cookie,
    verify_session_token, DashboardSessionError,
};
use super::store::{MetricEvent, MetricsOverview, PublicEvent, RECENT_RANGE_HOURS};
use crate::app::AppState;
use crate::http::{error_response, internal_error, ErrorResponse};

/// Longest accepted `error_reason`, in characters.
const MAX_ERROR_REASON_CHARS: usize = 500;

const CSV_HEADER: [&str; 10] = [
    "timestamp",
    "interface",
    "status_code",
    "latency_ms",
    "request_bytes",
    "tokens",
    "retry_count",
    "source",
    "request_id",
    "error_reason",
];

#[derive(Debug, Deserialize, ToSchema)]
pub struct MetricIngestRequest {
    pub interface: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub request_bytes: u64,
    pub tokens: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    pub source: String,
    pub request_id: Option<String>,
    /// At most 500 characters
    pub error_reason: Option<String>,
    /// Defaults to the time of ingestion. A value without an offset is UTC.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// RFC 3339, or an ISO 8601 local date-time read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestResponse {
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventsResponse {
    pub events: Vec<PublicEvent>,
}

/// Dashboard user resolved from the session cookie.
#[derive(Debug, Clone)]
pub struct DashboardUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for DashboardUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(state) = parts.extensions.get::<AppState>() else {
            tracing::error!("AppState extension missing");
            return Err(internal_error());
        };

        let token = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(find_session_cookie)
            .ok_or(DashboardSessionError::Missing);

        token
            .and_then(|token| {
                verify_session_token(token, state.config.dashboard_secret(), Utc::now().timestamp())
            })
            .map(DashboardUser)
            .map_err(|err| {
                error_response(StatusCode::UNAUTHORIZED, "unauthorized", &err.to_string())
            })
    }
}

fn recent_cutoff() -> DateTime<Utc> {
    Utc::now() - Duration::hours(RECENT_RANGE_HOURS)
}

fn with_cookie(status: StatusCode, cookie: &str, body: impl Serialize) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(cookie) => (status, [(SET_COOKIE, cookie)], Json(body)).into_response(),
        Err(e) => {
            tracing::error!("unencodable session cookie: {e}");
            internal_error()
        }
    }
}

/// POST /v1/metrics -- record one client-reported API call
#[utoipa::path(
    post,
    path = "/v1/metrics",
    tag = "metrics",
    request_body = MetricIngestRequest,
    params(("x-metrics-key" = String, Header, description = "Metrics ingest token")),
    responses(
        (status = 202, description = "Event stored", body = IngestResponse),
        (status = 400, description = "Invalid event", body = ErrorResponse),
        (status = 401, description = "Missing or wrong ingest token", body = ErrorResponse),
        (status = 500, description = "Event could not be persisted", body = ErrorResponse)
    )
)]
pub async fn ingest(
    Extension(state): Extension<AppState>,
    headers: HeaderMap,
    Json(req): Json<MetricIngestRequest>,
) -> Response {
    let Some(expected) = state
        .config
        .metrics
        .ingest_token
        .as_deref()
        .filter(|t| !t.is_empty())
    else {
        tracing::warn!("metrics ingest rejected: ingest token not configured");
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid metrics token");
    };

    let provided = headers
        .get("x-metrics-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !constant_time_eq(provided, expected) {
        tracing::warn!("metrics ingest rejected: invalid token");
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid metrics token");
    }

    if req
        .error_reason
        .as_deref()
        .is_some_and(|r| r.chars().count() > MAX_ERROR_REASON_CHARS)
    {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "error_reason must be at most 500 characters",
        );
    }

    let event = MetricEvent {
        interface: req.interface,
        status_code: req.status_code,
        latency_ms: req.latency_ms,
        request_bytes: req.request_bytes,
        tokens: req.tokens,
        retry_count: req.retry_count,
        source: req.source,
        request_id: req.request_id,
        error_reason: req.error_reason,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };
    let (interface, status_code, source) =
        (event.interface.clone(), event.status_code, event.source.clone());

    let store = state.metrics.clone();
    match tokio::task::spawn_blocking(move || store.add(event)).await {
        Ok(Ok(())) => {
            tracing::info!(%interface, status_code, %source, "metrics ingested");
            (
                StatusCode::ACCEPTED,
                Json(IngestResponse {
                    status: "queued".to_string(),
                }),
            )
                .into_response()
        }
        Ok(Err(_)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "persist_failed",
            "Failed to persist metrics",
        ),
        Err(e) => {
            tracing::error!("metrics persist task failed: {e}");
            internal_error()
        }
    }
}

/// POST /admin/metrics/login -- start a dashboard session
#[utoipa::path(
    post,
    path = "/admin/metrics/login",
    tag = "metrics",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session cookie set", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    )
)]
pub async fn login(
    Extension(state): Extension<AppState>,
    Json(req): Json<LoginRequest>,
) -> Response {
    let dashboard = &state.config.dashboard;
    let password_ok = dashboard
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .is_some_and(|expected| constant_time_eq(&req.password, expected));

    if req.username != dashboard.username || !password_ok {
        tracing::warn!(user = %req.username, "dashboard login failed");
        return error_response(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid credentials");
    }

    let token = make_session_token(
        &req.username,
        state.config.dashboard_secret(),
        dashboard.session_ttl_seconds,
        Utc::now().timestamp(),
    );
    tracing::info!(user = %req.username, "dashboard login");
    with_cookie(
        StatusCode::OK,
        &session_cookie(
            &token,
            dashboard.session_ttl_seconds,
            state.config.server.require_https,
        ),
        LoginResponse { ok: true },
    )
}

/// POST /admin/metrics/logout -- clear the dashboard session
#[utoipa::path(
    post,
    path = "/admin/metrics/logout",
    tag = "metrics",
    responses((status = 200, description = "Session cookie cleared", body = LoginResponse))
)]
pub async fn logout(Extension(state): Extension<AppState>) -> Response {
    with_cookie(
        StatusCode::OK,
        &clear_session_cookie(state.config.server.require_https),
        LoginResponse { ok: true },
    )
}

/// GET /admin/metrics/me
#[utoipa::path(
    get,
    path = "/admin/metrics/me",
    tag = "metrics",
    responses(
        (status = 200, body = MeResponse),
        (status = 401, description = "No valid session", body = ErrorResponse)
    )
)]
pub async fn me(DashboardUser(user): DashboardUser) -> Json<MeResponse> {
    Json(MeResponse { user })
}

/// GET /admin/metrics/data -- dashboard overview
#[utoipa::path(
    get,
    path = "/admin/metrics/data",
    tag = "metrics",
    responses(
        (status = 200, body = MetricsOverview),
        (status = 401, description = "No valid session", body = ErrorResponse)
    )
)]
pub async fn data(
    DashboardUser(user): DashboardUser,
    Extension(state): Extension<AppState>,
) -> Json<MetricsOverview> {
    tracing::debug!(%user, "metrics overview requested");
    Json(state.metrics.overview())
}

/// GET /admin/metrics/events -- last 7 days, newest first
#[utoipa::path(
    get,
    path = "/admin/metrics/events",
    tag = "metrics",
    responses(
        (status = 200, body = EventsResponse),
        (status = 401, description = "No valid session", body = ErrorResponse)
    )
)]
pub async fn events(
    DashboardUser(user): DashboardUser,
    Extension(state): Extension<AppState>,
) -> Json<EventsResponse> {
    let events: Vec<PublicEvent> = state
        .metrics
        .list_since(recent_cutoff())
        .iter()
        .rev()
        .map(MetricEvent::to_public)
        .collect();
    tracing::debug!(%user, count = events.len(), "metrics events requested");
    Json(EventsResponse { events })
}

/// GET /admin/metrics/export -- last 7 days as CSV
#[utoipa::path(
    get,
    path = "/admin/metrics/export",
    tag = "metrics",
    responses(
        (status = 200, description = "CSV attachment", content_type = "text/csv"),
        (status = 401, description = "No valid session", body = ErrorResponse)
    )
)]
pub async fn export(
    DashboardUser(user): DashboardUser,
    Extension(state): Extension<AppState>,
) -> Response {
    let events = state.metrics.list_since(recent_cutoff());
    tracing::info!(%user, count = events.len(), "metrics export");

    let filename = format!("metrics-last-7d-{}.csv", Utc::now().format("%Y%m%d"));
    let disposition = format!("attachment; filename=\"{filename}\"");
    match HeaderValue::from_str(&disposition) {
        Ok(disposition) => (
            StatusCode::OK,
            [
                (
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/csv; charset=utf-8"),
                ),
                (CONTENT_DISPOSITION, disposition),
            ],
            events_to_csv(&events),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("unencodable content disposition: {e}");
            internal_error()
        }
    }
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(out: &mut String, fields: &[String]) {
    let row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&row);
    out.push_str("\r\n");
}

/// Render events as CSV, oldest first. Line breaks inside an error reason
/// become spaces.
pub fn events_to_csv(events: &[MetricEvent]) -> String {
    let mut out = String::new();
    csv_row(
        &mut out,
        &CSV_HEADER.iter().map(ToString::to_string).collect::<Vec<_>>(),
    );

    for event in events {
        csv_row(
            &mut out,
            &[
                event.timestamp.to_rfc3339(),
                event.interface.clone(),
                event.status_code.to_string(),
                event.to_public().latency_ms.to_string(),
                event.request_bytes.to_string(),
                event.tokens.map(|t| t.to_string()).unwrap_or_default(),
                event.retry_count.to_string(),
                event.source.clone(),
                event.request_id.clone().unwrap_or_default(),
                event
                    .error_reason
                    .as_deref()
                    .unwrap_or_default()
                    .replace(['\r', '\n'], " "),
            ],
        );
    }
    out
}
