//! Notion OAuth token endpoint client.
//!
//! The authorization-code exchange happens here, server-side, so the Notion
//! client secret never ships with the app.

use std::time::Duration;

use async_trait::async_trait;
use isla_auth::TokenPayload;
use serde_json::Value;
use thiserror::Error;

/// Errors reaching the token endpoint. An HTTP error status is not an error
/// here; it comes back as a [`ProviderResponse`].
#[derive(Debug, Error)]
pub enum NotionClientError {
    /// Could not build the HTTP client
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// Network failure or timeout
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Status and body returned by the token endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub status: u16,
    /// JSON object body; empty when the body was not a JSON object.
    pub body: TokenPayload,
}

impl ProviderResponse {
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Best human-readable error from the body, falling back to the status.
    #[must_use]
    pub fn error_message(&self) -> String {
        ["error_description", "message", "error"]
            .iter()
            .find_map(|key| match self.body.get(*key) {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
                Some(Value::Null | Value::String(_)) | None => None,
                Some(other) => Some(other.to_string()),
            })
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }

    /// The non-empty `access_token` string in the body, if present.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.body
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.trim().is_empty())
    }
}

/// Trait for the authorization-code exchange.
///
/// Use [`HttpNotionClient`] in production, or
/// [`mock::MockNotionClient`] (behind `test-utils`) in tests.
#[async_trait]
pub trait NotionOAuthClient: Send + Sync {
    /// Exchange an authorization code for an access token payload.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderResponse, NotionClientError>;
}

/// HTTP implementation of [`NotionOAuthClient`].
pub struct HttpNotionClient {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpNotionClient {
    /// Create a client whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`NotionClientError::Build`] if the TLS backend cannot be initialised.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotionClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("IslaReader-Server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(NotionClientError::Build)?;

        Ok(Self::with_client(client, token_url, client_id, client_secret))
    }

    /// Create a client with a custom `reqwest::Client`.
    pub fn with_client(
        client: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl NotionOAuthClient for HttpNotionClient {
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<ProviderResponse, NotionClientError> {
        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": redirect_uri,
        });

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = match serde_json::from_slice(&bytes) {
            Ok(Value::Object(map)) => map,
            _ => TokenPayload::new(),
        };

        Ok(ProviderResponse { status, body })
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::missing_const_for_fn,
    clippy::must_use_candidate
)]
pub mod mock {
    //! Mock implementation for unit testing.

    use super::{NotionClientError, NotionOAuthClient, ProviderResponse};
    use async_trait::async_trait;
    use isla_auth::TokenPayload;
    use serde_json::Value;
    use std::sync::Mutex;

    fn object(body: Value) -> TokenPayload {
        match body {
            Value::Object(map) => map,
            _ => TokenPayload::new(),
        }
    }

    /// Canned outcome for the next exchange.
    #[derive(Debug, Clone)]
    pub enum MockOutcome {
        Respond(ProviderResponse),
        NetworkError,
    }

    /// Mock implementation of [`NotionOAuthClient`].
    ///
    /// Configure the response with `respond_with`/`fail_with_network_error`
    /// and verify calls with `calls()`.
    pub struct MockNotionClient {
        outcome: Mutex<MockOutcome>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl MockNotionClient {
        /// A mock that answers `200` with the given JSON body.
        pub fn new(body: Value) -> Self {
            Self {
                outcome: Mutex::new(MockOutcome::Respond(ProviderResponse {
                    status: 200,
                    body: object(body),
                })),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn respond_with(&self, status: u16, body: Value) {
            *self.outcome.lock().unwrap() = MockOutcome::Respond(ProviderResponse {
                status,
                body: object(body),
            });
        }

        pub fn fail_with_network_error(&self) {
            *self.outcome.lock().unwrap() = MockOutcome::NetworkError;
        }

        /// All `(code, redirect_uri)` pairs passed to `exchange_code`.
        pub fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Default for MockNotionClient {
        fn default() -> Self {
            Self::new(serde_json::json!({ "access_token": "mock-access-token" }))
        }
    }

    #[async_trait]
    impl NotionOAuthClient for MockNotionClient {
        async fn exchange_code(
            &self,
            code: &str,
            redirect_uri: &str,
        ) -> Result<ProviderResponse, NotionClientError> {
            self.calls
                .lock()
                .unwrap()
                .push((code.to_string(), redirect_uri.to_string()));

            let outcome = self.outcome.lock().unwrap().clone();
            match outcome {
                MockOutcome::Respond(response) => Ok(response),
                MockOutcome::NetworkError => {
                    // An unroutable URL gives a genuine reqwest::Error without a network.
                    let err = reqwest::Client::new()
                        .get("http://[::1]:0/")
                        .send()
                        .await
                        .unwrap_err();
                    Err(NotionClientError::Request(err))
                }
            }
        }
    }
}
