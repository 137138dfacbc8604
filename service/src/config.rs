use std::fmt;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_aux::prelude::deserialize_vec_from_string_or_vec;

/// Application configuration loaded from multiple sources.
///
/// Configuration is loaded in priority order (lowest to highest):
/// 1. Struct defaults
/// 2. config.yaml file (if exists)
/// 3. Environment variables with ISLA_ prefix (always wins)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub client: ClientConfig,
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,
    #[serde(default)]
    pub swagger: SwaggerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// HTTP server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP server bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Reject plain-HTTP requests unless `X-Forwarded-Proto: https` is present.
    #[serde(default = "default_true")]
    pub require_https: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter (debug, info, warn, error). `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// The mobile client allowed to fetch the shared AI key.
#[derive(Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Expected `client_id` in signed requests (required).
    #[serde(default)]
    pub id: String,

    /// HMAC secret shared with the client (required).
    #[serde(default)]
    pub secret: String,

    /// AI API key handed out after a valid signed request (required).
    #[serde(default)]
    pub api_key: String,

    /// Signed request freshness window, also reported as `expires_in`.
    #[serde(default = "default_request_ttl")]
    pub request_ttl_seconds: u64,

    /// Cap on remembered nonces.
    #[serde(default = "default_max_entries")]
    pub nonce_max_entries: usize,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct NotionConfig {
    /// OAuth client id. The Notion routes report an incomplete configuration when unset.
    pub client_id: Option<String>,

    /// OAuth client secret. Never sent to the device.
    pub client_secret: Option<String>,

    /// Redirect URI registered with Notion. Rebuilt from request headers when unset.
    pub redirect_uri: Option<String>,

    /// Token endpoint for the authorization-code exchange.
    #[serde(default = "default_notion_token_url")]
    pub token_url: String,

    /// Deep-link base the callback redirects the browser to.
    #[serde(default = "default_app_redirect_base")]
    pub app_redirect_base: String,

    /// How long a token payload waits for the app to finalize it.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// How long a used `state` value stays blocked.
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,

    #[serde(default = "default_max_entries")]
    pub max_sessions: usize,

    #[serde(default = "default_max_entries")]
    pub max_states: usize,

    /// Timeout for the upstream token request.
    #[serde(default = "default_upstream_timeout")]
    pub request_timeout_seconds: u64,
}

impl NotionConfig {
    /// Client credentials, if both are configured and non-empty.
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let id = self.client_id.as_deref().map(str::trim).filter(|s| !s.is_empty())?;
        let secret = self
            .client_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        Some((id, secret))
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Value clients send in `X-Metrics-Key`. Ingestion is rejected when unset.
    pub ingest_token: Option<String>,

    /// JSON-lines file the retained events are persisted to.
    #[serde(default = "default_metrics_file")]
    pub data_file: String,

    /// Number of newest events retained.
    #[serde(default = "default_max_events")]
    pub max_events: usize,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_username")]
    pub username: String,

    /// Login is rejected when unset.
    pub password: Option<String>,

    /// Cookie signing key. Falls back to `client.secret` when unset.
    pub secret: Option<String>,

    #[serde(default = "default_dashboard_session_ttl")]
    pub session_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests.
    /// Use `"*"` to allow any origin (not recommended for production).
    /// Accepts either an array or comma-separated string.
    /// Example: `["http://localhost:5173"]` or `"http://localhost:5173,https://app.example.com"`
    #[serde(
        default = "default_allowed_origins",
        deserialize_with = "deserialize_origins"
    )]
    pub allowed_origins: Vec<String>,
}

/// Deserialize origins from comma-separated string or array, filtering empty values.
fn deserialize_origins<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let origins: Vec<String> = deserialize_vec_from_string_or_vec(deserializer)?;
    Ok(origins.into_iter().filter(|s| !s.is_empty()).collect())
}

// These functions cannot be const because serde uses function pointers for defaults
#[allow(clippy::missing_const_for_fn)]
fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_request_ttl() -> u64 {
    300
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_entries() -> usize {
    10_000
}

fn default_notion_token_url() -> String {
    "https://api.notion.com/v1/oauth/token".to_string()
}

fn default_app_redirect_base() -> String {
    "lanread://notion".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_session_ttl() -> u64 {
    60
}

#[allow(clippy::missing_const_for_fn)]
fn default_state_ttl() -> u64 {
    600
}

#[allow(clippy::missing_const_for_fn)]
fn default_upstream_timeout() -> u64 {
    10
}

fn default_metrics_file() -> String {
    "data/metrics.jsonl".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_events() -> usize {
    5000
}

fn default_dashboard_username() -> String {
    "admin".to_string()
}

#[allow(clippy::missing_const_for_fn)]
fn default_dashboard_session_ttl() -> u64 {
    43_200 // 12 hours
}

#[allow(clippy::missing_const_for_fn)]
fn default_allowed_origins() -> Vec<String> {
    // Default to empty (no cross-origin requests allowed)
    vec![]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: None,
            token_url: default_notion_token_url(),
            app_redirect_base: default_app_redirect_base(),
            session_ttl_seconds: default_session_ttl(),
            state_ttl_seconds: default_state_ttl(),
            max_sessions: default_max_entries(),
            max_states: default_max_entries(),
            request_timeout_seconds: default_upstream_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            ingest_token: None,
            data_file: default_metrics_file(),
            max_events: default_max_events(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            username: default_dashboard_username(),
            password: None,
            secret: None,
            session_ttl_seconds: default_dashboard_session_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityHeadersConfig {
    /// Enable security headers (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Enable HSTS header (default: true; the service is HTTPS-only by default).
    #[serde(default = "default_true")]
    pub hsts_enabled: bool,

    /// HSTS max-age in seconds (default: 63072000 = 2 years).
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age: u64,

    /// Include subdomains in HSTS (default: true).
    #[serde(default = "default_true")]
    pub hsts_include_subdomains: bool,

    /// X-Frame-Options value: "DENY" or "SAMEORIGIN" (default: "DENY").
    #[serde(default = "default_frame_options")]
    pub frame_options: String,

    /// Content-Security-Policy header value (default: "default-src 'self'").
    #[serde(default = "default_csp")]
    pub content_security_policy: String,

    /// Referrer-Policy header value (default: "strict-origin-when-cross-origin").
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_hsts_max_age() -> u64 {
    63_072_000 // 2 years
}

fn default_frame_options() -> String {
    "DENY".to_string()
}

fn default_csp() -> String {
    "default-src 'self'".to_string()
}

fn default_referrer_policy() -> String {
    "strict-origin-when-cross-origin".to_string()
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            hsts_enabled: default_true(),
            hsts_max_age: default_hsts_max_age(),
            hsts_include_subdomains: default_true(),
            frame_options: default_frame_options(),
            content_security_policy: default_csp(),
            referrer_policy: default_referrer_policy(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SwaggerConfig {
    /// Enable Swagger UI at /swagger-ui.
    /// Default: false (disabled for security - exposes API documentation).
    /// Enable in development via `ISLA_SWAGGER__ENABLED=true`
    #[serde(default)]
    pub enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                port: default_port(),
                host: default_host(),
                require_https: default_true(),
            },
            logging: LoggingConfig {
                level: default_log_level(),
            },
            client: ClientConfig {
                id: String::new(),
                secret: String::new(),
                api_key: String::new(),
                request_ttl_seconds: default_request_ttl(),
                nonce_max_entries: default_max_entries(),
            },
            notion: NotionConfig::default(),
            metrics: MetricsConfig::default(),
            dashboard: DashboardConfig::default(),
            cors: CorsConfig::default(),
            security_headers: SecurityHeadersConfig::default(),
            swagger: SwaggerConfig::default(),
        }
    }
}

const REDACTED: &str = "[redacted]";

/// Upper bound for the OAuth state and session lifetimes (one day).
const MAX_HANDOFF_TTL_SECONDS: u64 = 86_400;

fn redact(value: Option<&String>) -> Option<&'static str> {
    value.map(|_| REDACTED)
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("id", &self.id)
            .field("secret", &REDACTED)
            .field("api_key", &REDACTED)
            .field("request_ttl_seconds", &self.request_ttl_seconds)
            .field("nonce_max_entries", &self.nonce_max_entries)
            .finish()
    }
}

impl fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(self.client_secret.as_ref()))
            .field("redirect_uri", &self.redirect_uri)
            .field("token_url", &self.token_url)
            .field("app_redirect_base", &self.app_redirect_base)
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .field("state_ttl_seconds", &self.state_ttl_seconds)
            .field("max_sessions", &self.max_sessions)
            .field("max_states", &self.max_states)
            .field("request_timeout_seconds", &self.request_timeout_seconds)
            .finish()
    }
}

impl fmt::Debug for MetricsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsConfig")
            .field("ingest_token", &redact(self.ingest_token.as_ref()))
            .field("data_file", &self.data_file)
            .field("max_events", &self.max_events)
            .finish()
    }
}

impl fmt::Debug for DashboardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DashboardConfig")
            .field("username", &self.username)
            .field("password", &redact(self.password.as_ref()))
            .field("secret", &redact(self.secret.as_ref()))
            .field("session_ttl_seconds", &self.session_ttl_seconds)
            .finish()
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Sources are merged in priority order:
    /// 1. Struct defaults (lowest)
    /// 2. config.yaml file (if exists)
    /// 3. Environment variables with ISLA_ prefix (highest)
    ///
    /// # Errors
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config.yaml")
    }

    /// Load configuration with a custom YAML file path.
    ///
    /// # Errors
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load_from(yaml_path: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(yaml_path))
            .merge(Env::prefixed("ISLA_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Key used to sign dashboard session cookies.
    #[must_use]
    pub fn dashboard_secret(&self) -> &str {
        self.dashboard
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(self.client.secret.as_str())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.client.id, "client.id", "ISLA_CLIENT__ID"),
            (&self.client.secret, "client.secret", "ISLA_CLIENT__SECRET"),
            (&self.client.api_key, "client.api_key", "ISLA_CLIENT__API_KEY"),
        ];
        for (value, name, env) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "{name} is required. Set {env} environment variable or configure in config.yaml."
                )));
            }
        }

        // Port must be non-zero
        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port cannot be 0".into()));
        }

        if self.client.request_ttl_seconds == 0 {
            return Err(ConfigError::Validation(
                "client.request_ttl_seconds cannot be 0".into(),
            ));
        }

        let handoff_ttls = [
            (self.notion.session_ttl_seconds, "notion.session_ttl_seconds"),
            (self.notion.state_ttl_seconds, "notion.state_ttl_seconds"),
        ];
        for (value, name) in handoff_ttls {
            if !(1..=MAX_HANDOFF_TTL_SECONDS).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be between 1 and {MAX_HANDOFF_TTL_SECONDS}"
                )));
            }
        }

        let capacities = [
            (self.client.nonce_max_entries, "client.nonce_max_entries"),
            (self.notion.max_sessions, "notion.max_sessions"),
            (self.notion.max_states, "notion.max_states"),
            (self.metrics.max_events, "metrics.max_events"),
        ];
        for (value, name) in capacities {
            if value == 0 {
                return Err(ConfigError::Validation(format!("{name} cannot be 0")));
            }
        }

        // CORS origins must be valid URLs or "*"
        for origin in &self.cors.allowed_origins {
            if origin != "*" && !origin.starts_with("http://") && !origin.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "cors.allowed_origins contains invalid origin '{origin}'. Must be '*' or start with http:// or https://"
                )));
            }
        }

        // X-Frame-Options must be DENY or SAMEORIGIN
        let frame_opts = self.security_headers.frame_options.to_uppercase();
        if frame_opts != "DENY" && frame_opts != "SAMEORIGIN" {
            return Err(ConfigError::Validation(format!(
                "security_headers.frame_options must be 'DENY' or 'SAMEORIGIN', got: '{}'",
                self.security_headers.frame_options
            )));
        }

        Ok(())
    }
}
