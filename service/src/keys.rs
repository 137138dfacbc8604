//! AI key issuance.
//!
//! The app never ships the upstream API key. It proves knowledge of the
//! shared client secret with a signed, single-use request and receives the
//! key in return.

use axum::{
    extract::Extension,
    http::{header::CACHE_CONTROL, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SubsecRound, Utc};
use isla_auth::SignedRequest;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app::AppState;
use crate::http::{unauthorized, ErrorResponse};

#[derive(Debug, Deserialize, ToSchema)]
pub struct KeyRequest {
    pub client_id: String,
    pub nonce: String,
    /// Unix seconds
    pub timestamp: i64,
    /// Lowercase hex HMAC-SHA256 of `{client_id}.{nonce}.{timestamp}`
    pub signature: String,
}

impl From<KeyRequest> for SignedRequest {
    fn from(req: KeyRequest) -> Self {
        Self {
            client_id: req.client_id,
            nonce: req.nonce,
            timestamp: req.timestamp,
            signature: req.signature,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct KeyResponse {
    pub api_key: String,
    /// Seconds the signed request window lasts
    pub expires_in: u64,
    pub issued_at: DateTime<Utc>,
    /// Echo of the nonce that was consumed
    pub nonce: String,
}

/// POST /v1/keys/ai -- issue the AI API key to an authenticated app
#[utoipa::path(
    post,
    path = "/v1/keys/ai",
    tag = "keys",
    request_body = KeyRequest,
    responses(
        (status = 200, description = "Key issued", body = KeyResponse),
        (status = 401, description = "Request authentication failed", body = ErrorResponse)
    )
)]
pub async fn issue_key(
    Extension(state): Extension<AppState>,
    Json(req): Json<KeyRequest>,
) -> Response {
    let request = SignedRequest::from(req);
    match state.authenticator.authenticate(&request) {
        Ok(client) => {
            tracing::info!(client_id = %client.client_id, "issued AI key");
            (
                StatusCode::OK,
                [(CACHE_CONTROL, HeaderValue::from_static("no-store"))],
                Json(KeyResponse {
                    api_key: state.config.client.api_key.clone(),
                    expires_in: state.authenticator.ttl_seconds(),
                    issued_at: Utc::now().trunc_subsecs(0),
                    nonce: client.nonce,
                }),
            )
                .into_response()
        }
        Err(err) => {
            tracing::warn!(
                client_id = %request.client_id,
                reason = err.code(),
                "key request rejected"
            );
            unauthorized(err)
        }
    }
}
