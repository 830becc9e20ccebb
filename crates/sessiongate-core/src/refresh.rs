//! Single-flight token refresh.
//!
//! When many requests hit a 401 at the same moment, only the first caller of
//! [`RefreshCoordinator::refresh`] talks to the identity service. Everyone who
//! arrives while that call is in flight is queued and receives the same
//! outcome: the new access token, or the same failure.
//!
//! ```text
//!          refresh() while Idle
//!   Idle ────────────────────────► Refreshing { waiters }
//!    ▲                                  │   refresh() while Refreshing
//!    │   success: persist, resolve all  │   → queued (no network call)
//!    └──────────────────────────────────┘
//!        failure: clear store, redirect to login, reject all
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::api::RefreshError;
use crate::auth::{CredentialStore, LogoutReason, SessionSignals};

/// Default bound on the refresh network call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of exchanging a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshGrant {
    pub access: String,
    /// Present when the identity service rotates refresh tokens.
    #[serde(default)]
    pub refresh: Option<String>,
}

/// The network half of a refresh: exchange a refresh token for a new access token.
pub trait TokenRefresher: Send + Sync {
    fn refresh<'a>(&'a self, refresh_token: &'a str)
        -> BoxFuture<'a, Result<RefreshGrant, RefreshError>>;
}

type Waiter = oneshot::Sender<Result<String, RefreshError>>;
type Ticket = oneshot::Receiver<Result<String, RefreshError>>;

/// Coordinator state. Waiters only exist while a refresh is in flight.
enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

/// Turns N concurrent "token expired" events into one refresh call.
pub struct RefreshCoordinator {
    refresher: Arc<dyn TokenRefresher>,
    store: CredentialStore,
    signals: SessionSignals,
    timeout: Option<Duration>,
    state: Mutex<RefreshState>,
    network_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        refresher: Arc<dyn TokenRefresher>,
        store: CredentialStore,
        signals: SessionSignals,
    ) -> Self {
        Self {
            refresher,
            store,
            signals,
            timeout: Some(DEFAULT_REFRESH_TIMEOUT),
            state: Mutex::new(RefreshState::Idle),
            network_calls: AtomicU64::new(0),
        }
    }

    /// Bound the refresh call; `None` waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Number of refresh calls actually sent to the identity service.
    pub fn network_calls(&self) -> u64 {
        self.network_calls.load(Ordering::SeqCst)
    }

    /// Obtain a new access token, joining an in-flight refresh if there is one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, RefreshError> {
        let queued = self.join(&mut self.lock_state());
        self.lead_or_wait(queued, refresh_token).await
    }

    /// Refresh on behalf of a request that was rejected while carrying `expired`.
    ///
    /// If an earlier episode already replaced that token, its successor is
    /// returned without a network call. Fails with [`RefreshError::SessionEnded`]
    /// when the session is gone, so a late 401 never refreshes a dead token.
    pub async fn refresh_expired(
        &self,
        expired: Option<&str>,
        refresh_token: &str,
    ) -> Result<String, RefreshError> {
        let queued = {
            let mut state = self.lock_state();
            // Successful episodes persist before returning to Idle, so the
            // store is authoritative once Idle is observed under the lock.
            if matches!(*state, RefreshState::Idle) {
                match self.store.access() {
                    None => return Err(RefreshError::SessionEnded),
                    Some(current) if expired != Some(current.as_str()) => {
                        debug!("Access token already refreshed, reusing it");
                        return Ok(current);
                    }
                    Some(_) => {}
                }
            }
            self.join(&mut state)
        };
        self.lead_or_wait(queued, refresh_token).await
    }

    /// Claim the episode when Idle (returns `None`), otherwise queue behind it.
    fn join(&self, state: &mut RefreshState) -> Option<Ticket> {
        match &mut *state {
            RefreshState::Idle => {
                *state = RefreshState::Refreshing {
                    waiters: Vec::new(),
                };
                None
            }
            RefreshState::Refreshing { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(queued = waiters.len(), "Refresh in flight, waiting");
                Some(rx)
            }
        }
    }

    async fn lead_or_wait(
        &self,
        queued: Option<Ticket>,
        refresh_token: &str,
    ) -> Result<String, RefreshError> {
        if let Some(rx) = queued {
            // A dropped sender means the flight was torn down without an outcome.
            return rx.await.unwrap_or(Err(RefreshError::Abandoned));
        }

        let mut flight = Flight {
            coordinator: self,
            settled: false,
        };
        let outcome = self.call_refresher(refresh_token).await;
        flight.settle(outcome)
    }

    async fn call_refresher(&self, refresh_token: &str) -> Result<RefreshGrant, RefreshError> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        info!("Refreshing access token");
        let call = self.refresher.refresh(refresh_token);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(RefreshError::TimedOut(limit))),
            None => call.await,
        }
    }

    /// Return to Idle, handing back whoever queued during the flight.
    fn drain(&self) -> Vec<Waiter> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        }
    }

    fn complete(&self, outcome: Result<RefreshGrant, RefreshError>) -> Result<String, RefreshError> {
        let outcome = outcome.and_then(|grant| {
            if grant.access.is_empty() {
                return Err(RefreshError::InvalidResponse(
                    "empty access token".to_string(),
                ));
            }
            Ok(grant)
        });

        match outcome {
            Ok(grant) => {
                match self.store.replace_access(grant.access.clone(), grant.refresh) {
                    Ok(Some(tier)) => debug!(%tier, "Refreshed token persisted"),
                    Ok(None) => debug!("Session ended during refresh, token not persisted"),
                    Err(e) => warn!(error = %e, "Failed to persist refreshed token"),
                }
                let waiters = self.drain();
                info!(waiters = waiters.len(), "Token refresh succeeded");
                for waiter in waiters {
                    let _ = waiter.send(Ok(grant.access.clone()));
                }
                Ok(grant.access)
            }
            Err(error) => {
                // Tear down while still Refreshing: a 401 landing now queues
                // behind this episode instead of starting one with the dead token.
                self.store.clear();
                self.signals.redirect_to_login(LogoutReason::RefreshFailed);
                let waiters = self.drain();
                warn!(error = %error, waiters = waiters.len(), "Token refresh failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                Err(error)
            }
        }
    }
}

/// The leader's claim on the current refresh episode.
///
/// If the leader is dropped before settling, queued callers are rejected
/// with [`RefreshError::Abandoned`] and the coordinator returns to Idle.
struct Flight<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl Flight<'_> {
    fn settle(&mut self, outcome: Result<RefreshGrant, RefreshError>) -> Result<String, RefreshError> {
        self.settled = true;
        self.coordinator.complete(outcome)
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = self.coordinator.drain();
        warn!(waiters = waiters.len(), "Refresh abandoned mid-flight");
        for waiter in waiters {
            let _ = waiter.send(Err(RefreshError::Abandoned));
        }
    }
}
