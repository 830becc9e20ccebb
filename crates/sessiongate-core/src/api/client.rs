//! API client for the identity service.
//!
//! This module provides the `ApiClient` struct for obtaining and refreshing
//! credentials. The same `reqwest::Client` (and its connection pool) is shared
//! with the gateway for protected calls.

use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::TokenPair;
use crate::refresh::{RefreshGrant, TokenRefresher};

use super::{ApiError, RefreshError};

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Issue-credentials endpoint
const TOKEN_PATH: &str = "/token/";

/// Refresh endpoint
const REFRESH_PATH: &str = "/token/refresh/";

/// Account registration endpoint
const REGISTER_PATH: &str = "/register/";

#[derive(Debug, Serialize)]
struct CredentialsRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct CredentialsResponse {
    access: String,
    refresh: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

/// New account details for `POST /register/`.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Client for the identity service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new client for the API rooted at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Reuse an existing connection pool.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url, path)
    }

    /// Exchange a username and password for a token pair
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&CredentialsRequest { username, password })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let body: CredentialsResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;

        debug!(username, "Credentials issued");
        TokenPair::new(body.access, body.refresh)
            .ok_or_else(|| ApiError::InvalidResponse("Token response contained an empty token".to_string()))
    }

    /// Exchange a refresh token for a new access token
    pub async fn refresh_access(&self, refresh_token: &str) -> Result<RefreshGrant, RefreshError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .header(header::ACCEPT, "application/json")
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<RefreshGrant>()
            .await
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))
    }

    /// Create a new account. The response body is returned as-is.
    pub async fn register(&self, registration: &Registration) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .post(self.url(REGISTER_PATH))
            .header(header::ACCEPT, "application/json")
            .json(registration)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse registration response: {}", e)))
    }

    /// Check if response is successful, returning an error with body if not.
    pub(crate) async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}

impl TokenRefresher for ApiClient {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<RefreshGrant, RefreshError>> {
        self.refresh_access(refresh_token).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_url_joining() {
        let api = ApiClient::new("http://localhost:8000/api/").unwrap();
        assert_eq!(api.base_url(), "http://localhost:8000/api");
        assert_eq!(api.url("/token/"), "http://localhost:8000/api/token/");
        assert_eq!(api.url("sessions/1/"), "http://localhost:8000/api/sessions/1/");
        assert_eq!(api.url("https://other.example/x"), "https://other.example/x");
    }

    #[tokio::test]
    async fn test_authenticate_returns_pair() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token/"))
            .and(body_json(json!({"username": "ada", "password": "pw"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"access": "a1", "refresh": "r1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let pair = api.authenticate("ada", "pw").await.unwrap();
        assert_eq!(pair, TokenPair::new("a1", "r1").unwrap());
    }

    #[tokio::test]
    async fn test_authenticate_bad_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token/"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "nope"})))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let result = api.authenticate("ada", "wrong").await;
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_refresh_access_parses_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token/refresh/"))
            .and(body_json(json!({"refresh": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "a2"})))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let grant = api.refresh_access("r1").await.unwrap();
        assert_eq!(grant.access, "a2");
        assert_eq!(grant.refresh, None);
    }

    #[tokio::test]
    async fn test_refresh_access_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token/refresh/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        assert_eq!(
            api.refresh_access("stale").await,
            Err(RefreshError::Rejected { status: 401 })
        );
    }

    #[tokio::test]
    async fn test_register_posts_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/register/"))
            .and(body_json(json!({"username": "ada", "password": "pw"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let created = api
            .register(&Registration {
                username: "ada".to_string(),
                password: "pw".to_string(),
                email: None,
            })
            .await
            .unwrap();
        assert_eq!(created["id"], 7);
    }
}
