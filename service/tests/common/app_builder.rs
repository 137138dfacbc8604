//! Test app builder that mirrors main.rs wiring with injectable mocks.
//!
//! [`TestAppBuilder`] starts from a complete, valid test configuration
//! (HTTPS not required, Notion credentials, metrics token and dashboard
//! password set) and lets each test flip what it needs. The router comes from
//! the same [`build_router`] that `main` uses.
//!
//! ```ignore
//! let app = TestAppBuilder::new()
//!     .with_cors(&["http://localhost:3000"])
//!     .build();
//! app.notion.respond_with(400, json!({"error": "invalid_grant"}));
//! ```

use std::sync::Arc;

use axum::Router;
use isla_server::{
    app::{build_router, AppState},
    config::Config,
    metrics::MetricsStore,
    notion::client::mock::MockNotionClient,
};
use tempfile::TempDir;

pub const CLIENT_ID: &str = "ios-test-client";
pub const CLIENT_SECRET: &str = "ios-test-secret";
pub const API_KEY: &str = "sk-test";
pub const NOTION_CLIENT_ID: &str = "notion-client-id";
pub const NOTION_CLIENT_SECRET: &str = "notion-client-secret";
pub const NOTION_REDIRECT_URI: &str = "https://example.com/notion/callback";
pub const METRICS_TOKEN: &str = "metrics-test-token";
pub const DASHBOARD_USER: &str = "admin";
pub const DASHBOARD_PASSWORD: &str = "dashboard-pass";

/// A built app plus the handles tests inspect.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub notion: Arc<MockNotionClient>,
    /// Keeps the metrics file alive for the test's duration.
    pub metrics_dir: TempDir,
}

/// Builder for test applications that mirrors main.rs wiring.
pub struct TestAppBuilder {
    config: Config,
    notion: Arc<MockNotionClient>,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestAppBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.server.require_https = false;
        config.client.id = CLIENT_ID.to_string();
        config.client.secret = CLIENT_SECRET.to_string();
        config.client.api_key = API_KEY.to_string();
        config.notion.client_id = Some(NOTION_CLIENT_ID.to_string());
        config.notion.client_secret = Some(NOTION_CLIENT_SECRET.to_string());
        config.notion.redirect_uri = Some(NOTION_REDIRECT_URI.to_string());
        config.metrics.ingest_token = Some(METRICS_TOKEN.to_string());
        config.dashboard.username = DASHBOARD_USER.to_string();
        config.dashboard.password = Some(DASHBOARD_PASSWORD.to_string());
        config.cors.allowed_origins = Vec::new();

        Self {
            config,
            notion: Arc::new(MockNotionClient::default()),
        }
    }

    #[must_use]
    pub fn with_https_required(mut self) -> Self {
        self.config.server.require_https = true;
        self
    }

    #[must_use]
    pub fn without_notion_credentials(mut self) -> Self {
        self.config.notion.client_id = None;
        self.config.notion.client_secret = None;
        self
    }

    #[must_use]
    pub fn with_cors(mut self, origins: &[&str]) -> Self {
        self.config.cors.allowed_origins = origins.iter().map(ToString::to_string).collect();
        self
    }

    #[must_use]
    pub fn with_swagger(mut self) -> Self {
        self.config.swagger.enabled = true;
        self
    }

    /// Arbitrary configuration tweak.
    #[must_use]
    pub fn with_config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> TestApp {
        self.config.validate().expect("test config should be valid");

        let metrics_dir = tempfile::tempdir().expect("tempdir");
        let metrics = MetricsStore::open(
            metrics_dir.path().join("metrics.jsonl"),
            self.config.metrics.max_events,
        );

        let state = AppState::new(self.config, self.notion.clone(), Arc::new(metrics));
        TestApp {
            router: build_router(state.clone()),
            state,
            notion: self.notion,
            metrics_dir,
        }
    }
}
