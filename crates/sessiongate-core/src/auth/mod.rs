//! Authentication state for the client.
//!
//! This module provides:
//! - `TokenPair` / `StoredCredentials`: the access + refresh credentials and their persisted form
//! - `TierBackend`: durable (file, keychain) and ephemeral (memory) storage tiers
//! - `CredentialStore`: keeps the live pair in exactly one tier
//! - `SessionSignals`: login redirects and the one-shot "session expired" flag

pub mod credentials;
pub mod signals;
pub mod storage;
pub mod tokens;

pub use credentials::CredentialStore;
pub use signals::{LoginRedirect, LogoutReason, SessionSignals};
pub use storage::{FileBackend, KeyringBackend, MemoryBackend, TierBackend};
pub use tokens::{StorageTier, StoredCredentials, TokenPair};
