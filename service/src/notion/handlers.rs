//! HTTP handlers for the Notion OAuth relay.

use axum::{
    extract::{Extension, Query},
    http::{
        header::{CACHE_CONTROL, LOCATION},
        HeaderMap, HeaderValue, StatusCode, Uri,
    },
    response::{IntoResponse, Response},
    Json,
};
use isla_auth::{AuthError, SignedRequest, TokenPayload};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use super::redirect::{app_link, clean_message, resolve_redirect_uri};
use crate::app::AppState;
use crate::http::{error_response, unauthorized, ErrorResponse};

/// Query parameters Notion appends to the callback URL.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct FinalizeRequest {
    pub session_id: String,
}

/// Signed request carrying an authorization code.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ExchangeRequest {
    pub client_id: String,
    pub nonce: String,
    /// Unix seconds
    pub timestamp: i64,
    /// Lowercase hex HMAC-SHA256 of `{client_id}.{nonce}.{timestamp}`
    pub signature: String,
    /// Authorization code from the Notion consent screen
    pub code: String,
    /// Overrides the configured redirect URI
    pub redirect_uri: Option<String>,
}

impl ExchangeRequest {
    fn signed(&self) -> SignedRequest {
        SignedRequest {
            client_id: self.client_id.clone(),
            nonce: self.nonce.clone(),
            timestamp: self.timestamp,
            signature: self.signature.clone(),
        }
    }
}

fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(location) => (
            StatusCode::FOUND,
            [
                (LOCATION, location),
                (CACHE_CONTROL, HeaderValue::from_static("no-store")),
            ],
        )
            .into_response(),
        Err(e) => {
            tracing::error!("unencodable redirect location: {e}");
            crate::http::internal_error()
        }
    }
}

fn redirect_error(state: &AppState, message: &str, oauth_state: &str) -> Response {
    let message = clean_message(message);
    found(&app_link(
        &state.config.notion.app_redirect_base,
        "error",
        &[("msg", &message), ("state", oauth_state)],
    ))
}

fn no_store_json(status: StatusCode, body: TokenPayload) -> Response {
    (
        status,
        [(CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Json(body),
    )
        .into_response()
}

/// GET /notion/callback -- exchange the code and bounce back to the app
#[utoipa::path(
    get,
    path = "/notion/callback",
    tag = "notion",
    params(CallbackParams),
    responses((status = 302, description = "Redirect to the app deep link"))
)]
pub async fn notion_callback(
    Extension(state): Extension<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let verified_state = match state.handoff.accept_callback(params.state.as_deref()) {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(reason = err.code(), "notion callback rejected: invalid state");
            return redirect_error(&state, "Invalid OAuth state", "");
        }
    };

    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        tracing::warn!(state = %verified_state, "notion callback rejected: missing code");
        return redirect_error(&state, "Missing authorization code", &verified_state);
    };

    if state.config.notion.credentials().is_none() {
        tracing::error!("notion callback failed: client_id/client_secret not configured");
        return redirect_error(
            &state,
            "Server OAuth configuration is incomplete",
            &verified_state,
        );
    }

    let redirect_uri =
        resolve_redirect_uri(state.config.notion.redirect_uri.as_deref(), &headers, &uri);

    let response = match state.notion.exchange_code(code, &redirect_uri).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("notion token request failed: {e}");
            return redirect_error(&state, "Failed to reach Notion API", &verified_state);
        }
    };

    if response.is_error() {
        let error = response.error_message();
        tracing::warn!(status = response.status, %error, "notion token exchange failed");
        return redirect_error(
            &state,
            &format!("Notion OAuth failed: {error}"),
            &verified_state,
        );
    }

    if response.access_token().is_none() {
        tracing::error!(
            status = response.status,
            "notion token response missing access_token"
        );
        return redirect_error(
            &state,
            "Notion response missing access_token",
            &verified_state,
        );
    }

    let workspace_id = response.body.get("workspace_id").cloned();
    let session_id = state.handoff.store(response.body);
    tracing::info!(
        workspace_id = ?workspace_id,
        session_ttl_secs = state.handoff.session_ttl().as_secs(),
        "notion callback succeeded"
    );

    found(&app_link(
        &state.config.notion.app_redirect_base,
        "finish",
        &[
            ("session", &session_id.to_string()),
            ("state", &verified_state),
        ],
    ))
}

/// POST /v1/oauth/finalize -- redeem a one-time session id
#[utoipa::path(
    post,
    path = "/v1/oauth/finalize",
    tag = "notion",
    request_body = FinalizeRequest,
    responses(
        (status = 200, description = "Token payload relayed from Notion"),
        (status = 400, description = "Malformed, unknown or consumed session", body = ErrorResponse)
    )
)]
pub async fn finalize(
    Extension(state): Extension<AppState>,
    Json(req): Json<FinalizeRequest>,
) -> Response {
    match state.handoff.finalize(&req.session_id) {
        Ok(payload) => no_store_json(StatusCode::OK, payload),
        Err(AuthError::InvalidFormat) => error_response(
            StatusCode::BAD_REQUEST,
            "invalid_session",
            "session_id is required",
        ),
        Err(err) => error_response(StatusCode::BAD_REQUEST, "session_expired", &err.to_string()),
    }
}

/// POST /v1/notion/exchange -- signed authorization-code exchange
#[utoipa::path(
    post,
    path = "/v1/notion/exchange",
    tag = "notion",
    request_body = ExchangeRequest,
    responses(
        (status = 200, description = "Token payload relayed from Notion"),
        (status = 400, description = "Missing code or redirect URI", body = ErrorResponse),
        (status = 401, description = "Request authentication failed", body = ErrorResponse),
        (status = 502, description = "Notion rejected or could not be reached", body = ErrorResponse),
        (status = 503, description = "Notion credentials not configured", body = ErrorResponse)
    )
)]
pub async fn exchange(
    Extension(state): Extension<AppState>,
    Json(req): Json<ExchangeRequest>,
) -> Response {
    let client = match state.authenticator.authenticate(&req.signed()) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(
                client_id = %req.client_id,
                reason = err.code(),
                "notion exchange rejected"
            );
            return unauthorized(err);
        }
    };

    if state.config.notion.credentials().is_none() {
        tracing::error!("notion exchange failed: client_id/client_secret not configured");
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "oauth_not_configured",
            "Server OAuth configuration is incomplete",
        );
    }

    let code = req.code.trim();
    if code.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Missing authorization code",
        );
    }

    let Some(redirect_uri) = req
        .redirect_uri
        .as_deref()
        .or(state.config.notion.redirect_uri.as_deref())
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
    else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is required",
        );
    };

    let response = match state.notion.exchange_code(code, redirect_uri).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(client_id = %client.client_id, "notion token request failed: {e}");
            return error_response(
                StatusCode::BAD_GATEWAY,
                "upstream_unreachable",
                "Failed to reach Notion API",
            );
        }
    };

    if response.is_error() {
        let error = response.error_message();
        tracing::warn!(
            client_id = %client.client_id,
            status = response.status,
            %error,
            "notion token exchange failed"
        );
        return error_response(
            StatusCode::BAD_GATEWAY,
            "upstream_rejected",
            &clean_message(&format!("Notion OAuth failed: {error}")),
        );
    }

    tracing::info!(client_id = %client.client_id, "notion code exchanged");
    no_store_json(StatusCode::OK, response.body)
}
