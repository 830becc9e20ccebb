//! REST client module for the identity service.
//!
//! This module provides the `ApiClient` for issuing credentials, refreshing
//! access tokens, and registering accounts, plus the error types shared with
//! the gateway.
//!
//! Protected resource calls do not go through `ApiClient` directly; they go
//! through [`crate::gateway::AuthGateway`], which attaches the bearer token.

pub mod client;
pub mod error;

pub use client::{ApiClient, Registration};
pub use error::{ApiError, RefreshError};
