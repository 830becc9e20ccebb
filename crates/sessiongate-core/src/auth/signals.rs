//! Session side channel: "go to the login surface" and the one-shot expiry notice.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

/// Enough headroom that a slow login surface never misses a redirect.
const REDIRECT_CHANNEL_CAPACITY: usize = 16;

/// Why the session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// A 401 arrived and there was no refresh token to recover with.
    MissingRefreshToken,
    /// The refresh call failed, timed out, or was rejected.
    RefreshFailed,
    /// A request retried with a fresh token was rejected again.
    RetryRejected,
    /// No user activity for the whole inactivity window.
    Inactivity,
    /// A protected surface was entered without a session.
    NotAuthenticated,
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogoutReason::MissingRefreshToken => "no refresh token",
            LogoutReason::RefreshFailed => "token refresh failed",
            LogoutReason::RetryRejected => "request rejected after refresh",
            LogoutReason::Inactivity => "inactivity",
            LogoutReason::NotAuthenticated => "not authenticated",
        };
        f.write_str(text)
    }
}

/// Request to navigate to the login surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRedirect {
    pub reason: LogoutReason,
}

struct Inner {
    redirects: broadcast::Sender<LoginRedirect>,
    session_expired: AtomicBool,
}

/// Shared handle for login redirects and the "session expired" flag.
#[derive(Clone)]
pub struct SessionSignals {
    inner: Arc<Inner>,
}

impl SessionSignals {
    pub fn new() -> Self {
        let (redirects, _) = broadcast::channel(REDIRECT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                redirects,
                session_expired: AtomicBool::new(false),
            }),
        }
    }

    /// Ask whoever renders the UI to show the login surface.
    pub fn redirect_to_login(&self, reason: LogoutReason) {
        info!(%reason, "Redirecting to login");
        // No subscribers just means nothing is rendering right now.
        let _ = self.inner.redirects.send(LoginRedirect { reason });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoginRedirect> {
        self.inner.redirects.subscribe()
    }

    pub fn mark_session_expired(&self) {
        self.inner.session_expired.store(true, Ordering::SeqCst);
    }

    /// Read and reset the expiry flag; only the first login render sees it.
    pub fn take_session_expired(&self) -> bool {
        self.inner.session_expired.swap(false, Ordering::SeqCst)
    }
}

impl Default for SessionSignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn test_expired_flag_is_one_shot() {
        let signals = SessionSignals::new();
        assert!(!signals.take_session_expired());

        signals.mark_session_expired();
        assert!(signals.take_session_expired());
        assert!(!signals.take_session_expired());
    }

    #[test]
    fn test_redirect_reaches_subscribers() {
        let signals = SessionSignals::new();
        let mut rx = signals.subscribe();

        signals.redirect_to_login(LogoutReason::Inactivity);
        assert_eq!(
            rx.try_recv().unwrap(),
            LoginRedirect {
                reason: LogoutReason::Inactivity
            }
        );
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn test_redirect_without_subscribers_is_harmless() {
        let signals = SessionSignals::new();
        signals.redirect_to_login(LogoutReason::RefreshFailed);
    }
}
