//! Composition root: one store, one set of signals, one refresh coordinator,
//! and the gateway built on top of them.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::api::{ApiClient, ApiError, Registration};
use crate::auth::{CredentialStore, LogoutReason, SessionSignals, StorageTier, StoredCredentials};
use crate::gateway::AuthGateway;
use crate::refresh::RefreshCoordinator;
use crate::watchdog::{ActivityWatchdog, WatchdogConfig};

/// Message shown on the login surface after an inactivity logout.
pub const SESSION_EXPIRED_NOTICE: &str = "Session expired, please log in again.";

/// The client-side session for one execution context.
pub struct Session {
    api: ApiClient,
    store: CredentialStore,
    signals: SessionSignals,
    gateway: AuthGateway,
}

impl Session {
    pub fn new(api: ApiClient, store: CredentialStore, refresh_timeout: Option<Duration>) -> Self {
        let signals = SessionSignals::new();
        let coordinator = Arc::new(
            RefreshCoordinator::new(Arc::new(api.clone()), store.clone(), signals.clone())
                .with_timeout(refresh_timeout),
        );
        let gateway = AuthGateway::new(api.clone(), store.clone(), coordinator, signals.clone());
        Self {
            api,
            store,
            signals,
            gateway,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn signals(&self) -> &SessionSignals {
        &self.signals
    }

    pub fn gateway(&self) -> &AuthGateway {
        &self.gateway
    }

    /// Log in and persist the pair; `remember` keeps it across restarts.
    pub async fn login(&self, username: &str, password: &str, remember: bool) -> Result<(), ApiError> {
        let pair = self.api.authenticate(username, password).await?;
        let tier = if remember {
            StorageTier::Durable
        } else {
            StorageTier::Ephemeral
        };
        self.store
            .save(pair, tier)
            .map_err(|e| ApiError::Storage(format!("{:#}", e)))?;
        info!(username, %tier, "Logged in");
        Ok(())
    }

    pub async fn register(&self, registration: &Registration) -> Result<serde_json::Value, ApiError> {
        self.api.register(registration).await
    }

    pub fn logout(&self) {
        self.store.clear();
        info!("Logged out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.has_session()
    }

    pub fn credentials(&self) -> Option<StoredCredentials> {
        self.store.load()
    }

    /// Guard for protected surfaces: without a token, redirect to login.
    pub fn require_authenticated(&self) -> Result<(), ApiError> {
        if self.is_authenticated() {
            Ok(())
        } else {
            self.signals.redirect_to_login(LogoutReason::NotAuthenticated);
            Err(ApiError::NotAuthenticated)
        }
    }

    pub fn start_watchdog(&self, config: WatchdogConfig) -> ActivityWatchdog {
        ActivityWatchdog::start(self.store.clone(), self.signals.clone(), config)
    }

    /// The login surface calls this once per render; the notice is shown at most once.
    pub fn take_expired_notice(&self) -> Option<&'static str> {
        self.signals
            .take_session_expired()
            .then_some(SESSION_EXPIRED_NOTICE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenPair;

    fn session() -> Session {
        let api = ApiClient::new("http://127.0.0.1:9").unwrap();
        Session::new(api, CredentialStore::in_memory(), None)
    }

    #[tokio::test]
    async fn test_require_authenticated_redirects() {
        let session = session();
        let mut rx = session.signals().subscribe();

        assert!(matches!(
            session.require_authenticated(),
            Err(ApiError::NotAuthenticated)
        ));
        assert_eq!(rx.try_recv().unwrap().reason, LogoutReason::NotAuthenticated);

        session
            .store()
            .save(TokenPair::new("a", "r").unwrap(), StorageTier::Ephemeral)
            .unwrap();
        assert!(session.require_authenticated().is_ok());
    }

    #[tokio::test]
    async fn test_expired_notice_shown_once() {
        let session = session();
        assert!(session.take_expired_notice().is_none());

        session.signals().mark_session_expired();
        assert_eq!(session.take_expired_notice(), Some(SESSION_EXPIRED_NOTICE));
        assert!(session.take_expired_notice().is_none());
    }

    #[tokio::test]
    async fn test_logout_clears_credentials() {
        let session = session();
        session
            .store()
            .save(TokenPair::new("a", "r").unwrap(), StorageTier::Durable)
            .unwrap();
        assert!(session.is_authenticated());

        session.logout();
        session.logout();
        assert!(!session.is_authenticated());
        assert!(session.credentials().is_none());
    }
}
