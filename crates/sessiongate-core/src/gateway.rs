//! Authenticated request gateway.
//!
//! Every protected call goes through [`AuthGateway::send`]:
//! 1. attach `Authorization: Bearer <access>` when a token is stored
//! 2. send; anything other than a first-time 401 is returned as-is
//! 3. on a first 401, refresh through the shared [`RefreshCoordinator`]
//!    and resend the original request exactly once; a 401 for a token that
//!    has already been replaced reuses the replacement instead

use std::sync::Arc;

use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError, RefreshError};
use crate::auth::{CredentialStore, LogoutReason, SessionSignals};
use crate::refresh::RefreshCoordinator;

/// Enough of a protected call to send it again after a refresh.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Set once the call has been through a refresh; a retried call is never refreshed again.
    pub retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to encode request body: {}", e)))?;
        self.body = Some(value);
        Ok(self)
    }
}

/// Wraps protected calls with bearer attachment and refresh-and-retry.
///
/// Clone is cheap; clones share the store and the refresh coordinator.
#[derive(Clone)]
pub struct AuthGateway {
    api: ApiClient,
    store: CredentialStore,
    coordinator: Arc<RefreshCoordinator>,
    signals: SessionSignals,
}

impl AuthGateway {
    pub fn new(
        api: ApiClient,
        store: CredentialStore,
        coordinator: Arc<RefreshCoordinator>,
        signals: SessionSignals,
    ) -> Self {
        Self {
            api,
            store,
            coordinator,
            signals,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Send a protected call, recovering from one expired access token.
    ///
    /// Transport errors and non-401 responses come back untouched. A 401
    /// that cannot be recovered ends the session before the error is returned.
    pub async fn send(&self, mut request: RequestDescriptor) -> Result<Response, ApiError> {
        let sent = self.store.access();
        let response = self.dispatch(&request, sent.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if request.retried {
            return Err(self.teardown(&request, LogoutReason::RetryRejected));
        }

        let Some(refresh_token) = self.store.refresh() else {
            if sent.is_some() {
                // Ended by someone else while this request was in flight.
                debug!(method = %request.method, path = %request.path, "Session ended before 401 arrived");
                return Err(ApiError::Unauthorized);
            }
            return Err(self.teardown(&request, LogoutReason::MissingRefreshToken));
        };

        debug!(method = %request.method, path = %request.path, "Access token expired, refreshing");
        request.retried = true;
        // Refresh failures are torn down once by the coordinator, not per request.
        let access = match self
            .coordinator
            .refresh_expired(sent.as_deref(), &refresh_token)
            .await
        {
            Ok(access) => access,
            Err(RefreshError::SessionEnded) => return Err(ApiError::Unauthorized),
            Err(e) => return Err(e.into()),
        };

        let response = self.dispatch(&request, Some(&access)).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(self.teardown(&request, LogoutReason::RetryRejected));
        }
        Ok(response)
    }

    async fn dispatch(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut builder = self
            .api
            .http()
            .request(request.method.clone(), self.api.url(&request.path));
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        Ok(builder.send().await?)
    }

    fn teardown(&self, request: &RequestDescriptor, reason: LogoutReason) -> ApiError {
        warn!(method = %request.method, path = %request.path, %reason, "Unrecoverable 401, ending session");
        self.store.clear();
        self.signals.redirect_to_login(reason);
        ApiError::Unauthorized
    }

    // ===== Typed helpers =====

    async fn send_json<T: DeserializeOwned>(&self, request: RequestDescriptor) -> Result<T, ApiError> {
        let path = request.path.clone();
        let response = ApiClient::check_response(self.send(request).await?).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e)))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(RequestDescriptor::get(path)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(RequestDescriptor::post(path).with_json(body)?).await
    }

    pub async fn patch_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(RequestDescriptor::patch(path).with_json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        ApiClient::check_response(self.send(RequestDescriptor::delete(path)).await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_builders() {
        let get = RequestDescriptor::get("/sessions/");
        assert_eq!(get.method, Method::GET);
        assert!(!get.retried);
        assert!(get.body.is_none());

        let post = RequestDescriptor::post("/sessions/")
            .with_json(&json!({"pasted_code": "def f(): pass"}))
            .unwrap();
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.body, Some(json!({"pasted_code": "def f(): pass"})));

        assert_eq!(RequestDescriptor::patch("/x").method, Method::PATCH);
        assert_eq!(RequestDescriptor::put("/x").method, Method::PUT);
        assert_eq!(RequestDescriptor::delete("/x").method, Method::DELETE);
    }
}
