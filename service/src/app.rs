//! Application state and router wiring.
//!
//! `main` and the integration-test builder both go through [`build_router`],
//! so tests exercise the same middleware stack as production.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{HeaderValue, Method},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use isla_auth::{
    AuthenticatorConfig, EphemeralSessionCache, OAuthHandoff, RequestAuthenticator,
    StateReplayGuard,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::Config;
use crate::http::{
    build_security_headers, require_https_middleware, security_headers_middleware,
    TransportPolicy,
};
use crate::metrics::{handlers as metrics, MetricsStore};
use crate::notion::{self, HttpNotionClient, NotionClientError, NotionOAuthClient};
use crate::{keys, rest::ApiDoc};

/// Shared state handed to every handler through an `Extension` layer.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authenticator: Arc<RequestAuthenticator>,
    pub handoff: Arc<OAuthHandoff>,
    pub notion: Arc<dyn NotionOAuthClient>,
    pub metrics: Arc<MetricsStore>,
}

impl AppState {
    /// Build the auth core from configuration around the given collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        notion: Arc<dyn NotionOAuthClient>,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        let authenticator = RequestAuthenticator::new(AuthenticatorConfig {
            client_id: config.client.id.clone(),
            client_secret: config.client.secret.clone(),
            ttl_seconds: config.client.request_ttl_seconds,
            max_nonces: config.client.nonce_max_entries,
        });

        let handoff = OAuthHandoff::new(
            StateReplayGuard::new(
                Duration::from_secs(config.notion.state_ttl_seconds),
                config.notion.max_states,
            ),
            EphemeralSessionCache::new(config.notion.max_sessions),
            Duration::from_secs(config.notion.session_ttl_seconds),
        );

        Self {
            config: Arc::new(config),
            authenticator: Arc::new(authenticator),
            handoff: Arc::new(handoff),
            notion,
            metrics,
        }
    }

    /// Production wiring: HTTP Notion client and the file-backed metrics store.
    ///
    /// # Errors
    ///
    /// Returns [`NotionClientError::Build`] if the HTTP client cannot be created.
    pub fn from_config(config: Config) -> Result<Self, NotionClientError> {
        let (client_id, client_secret) = config.notion.credentials().unwrap_or_default();
        let notion = HttpNotionClient::new(
            config.notion.token_url.clone(),
            client_id,
            client_secret,
            Duration::from_secs(config.notion.request_timeout_seconds),
        )?;
        let metrics = MetricsStore::open(&config.metrics.data_file, config.metrics.max_events);

        Ok(Self::new(config, Arc::new(notion), Arc::new(metrics)))
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub require_https: bool,
}

/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, body = HealthResponse))
)]
pub async fn health_check(Extension(state): Extension<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        require_https: state.config.server.require_https,
    })
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let allow_origin: AllowOrigin = if origins.iter().any(|o| o == "*") {
        tracing::warn!("CORS configured to allow any origin - not recommended for production");
        AllowOrigin::any()
    } else if origins.is_empty() {
        tracing::info!("CORS allowed origins not configured - cross-origin requests will be blocked");
        return None;
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        tracing::info!(origins = ?origins, "CORS allowed origins configured");
        AllowOrigin::list(parsed)
    };

    Some(
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .allow_origin(allow_origin)
            .max_age(Duration::from_secs(600)),
    )
}

/// Assemble routes and middleware around `state`.
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let mut app = Router::new()
        .route("/health", get(health_check))
        .route("/v1/keys/ai", post(keys::issue_key))
        .route("/notion/callback", get(notion::notion_callback))
        .route("/v1/oauth/finalize", post(notion::finalize))
        .route("/v1/notion/exchange", post(notion::exchange))
        .route("/v1/metrics", post(metrics::ingest))
        .route("/admin/metrics/login", post(metrics::login))
        .route("/admin/metrics/logout", post(metrics::logout))
        .route("/admin/metrics/me", get(metrics::me))
        .route("/admin/metrics/data", get(metrics::data))
        .route("/admin/metrics/events", get(metrics::events))
        .route("/admin/metrics/export", get(metrics::export));

    if config.swagger.enabled {
        tracing::info!("Swagger UI enabled at /swagger-ui");
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    app = app
        .layer(Extension(state))
        .layer(middleware::from_fn(require_https_middleware))
        .layer(Extension(TransportPolicy {
            require_https: config.server.require_https,
        }));

    app = app
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(Extension(build_security_headers(&config.security_headers)));

    if let Some(cors) = cors_layer(&config.cors.allowed_origins) {
        app = app.layer(cors);
    }

    app.layer(TraceLayer::new_for_http())
}
