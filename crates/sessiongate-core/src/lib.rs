//! Sessiongate core - authenticated request gateway for a token-based API.
//!
//! The pieces, leaf first:
//! - [`auth::CredentialStore`]: token pair persisted in exactly one of two tiers
//! - [`refresh::RefreshCoordinator`]: single-flight token refresh
//! - [`gateway::AuthGateway`]: bearer attachment, 401 detection, one retry
//! - [`watchdog::ActivityWatchdog`]: inactivity logout
//!
//! [`session::Session`] wires them together for an application.

pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod refresh;
pub mod session;
pub mod watchdog;

pub use api::{ApiClient, ApiError, RefreshError};
pub use auth::{CredentialStore, SessionSignals, StorageTier, TokenPair};
pub use gateway::{AuthGateway, RequestDescriptor};
pub use refresh::{RefreshCoordinator, RefreshGrant, TokenRefresher};
pub use session::Session;
pub use watchdog::{ActivitySignal, ActivityWatchdog, WatchdogConfig};
