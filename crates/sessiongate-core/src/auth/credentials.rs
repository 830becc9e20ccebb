use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use tracing::{debug, warn};

use super::storage::{MemoryBackend, TierBackend};
use super::tokens::{StorageTier, StoredCredentials, TokenPair};

struct Tiers {
    durable: Box<dyn TierBackend>,
    ephemeral: Box<dyn TierBackend>,
    /// The live record. Backends are scanned once at construction and every
    /// write goes through `Tiers`, so this never drifts from storage.
    current: Option<StoredCredentials>,
}

impl Tiers {
    fn backend(&self, tier: StorageTier) -> &dyn TierBackend {
        match tier {
            StorageTier::Durable => self.durable.as_ref(),
            StorageTier::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    /// Read one tier, discarding anything that is not a complete record tagged for it.
    fn read(&self, tier: StorageTier) -> Option<StoredCredentials> {
        match self.backend(tier).load() {
            Ok(Some(stored)) if stored.tier != tier => {
                warn!(%tier, tagged = %stored.tier, "Ignoring credentials stored under the wrong tier");
                None
            }
            Ok(Some(stored)) if !stored.is_complete() => {
                warn!(%tier, "Ignoring incomplete credentials");
                None
            }
            Ok(stored) => stored,
            Err(e) => {
                warn!(%tier, error = %e, "Failed to read credentials");
                None
            }
        }
    }

    /// Ephemeral is the in-progress interactive session, so it wins.
    fn scan(&self) -> Option<StoredCredentials> {
        self.read(StorageTier::Ephemeral)
            .or_else(|| self.read(StorageTier::Durable))
    }

    /// Empty both tiers, then write `record` into the tier it is tagged with.
    fn replace(&mut self, record: StoredCredentials) -> Result<()> {
        self.current = None;
        self.remove_all()?;
        self.backend(record.tier).store(&record)?;
        self.current = Some(record);
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        let durable = self.durable.remove();
        let ephemeral = self.ephemeral.remove();
        durable.and(ephemeral)
    }
}

/// Persists the live token pair in exactly one storage tier.
///
/// Clone is cheap; clones share the same tiers. Every operation runs under a
/// single lock, so a save (clear both, write one) is never observed half-done.
/// Reads are answered from memory; only writes reach the backends.
#[derive(Clone)]
pub struct CredentialStore {
    tiers: Arc<Mutex<Tiers>>,
}

impl CredentialStore {
    pub fn new(durable: Box<dyn TierBackend>, ephemeral: Box<dyn TierBackend>) -> Self {
        let mut tiers = Tiers {
            durable,
            ephemeral,
            current: None,
        };
        tiers.current = tiers.scan();
        Self {
            tiers: Arc::new(Mutex::new(tiers)),
        }
    }

    /// Both tiers held in memory.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryBackend::new()), Box::new(MemoryBackend::new()))
    }

    fn lock(&self) -> MutexGuard<'_, Tiers> {
        self.tiers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Access token from whichever tier holds the session.
    pub fn access(&self) -> Option<String> {
        self.lock().current.as_ref().map(|stored| stored.pair.access.clone())
    }

    /// Refresh token from whichever tier holds the session.
    pub fn refresh(&self) -> Option<String> {
        self.lock().current.as_ref().map(|stored| stored.pair.refresh.clone())
    }

    pub fn has_session(&self) -> bool {
        self.lock().current.is_some()
    }

    pub fn load(&self) -> Option<StoredCredentials> {
        self.lock().current.clone()
    }

    pub fn current_tier(&self) -> Option<StorageTier> {
        self.lock().current.as_ref().map(|stored| stored.tier)
    }

    /// Raw read of a single backend, bypassing the in-memory record.
    pub fn read_tier(&self, tier: StorageTier) -> Option<StoredCredentials> {
        self.lock().read(tier)
    }

    /// Replace the session: both tiers are cleared, then `pair` goes into `tier`.
    pub fn save(&self, pair: TokenPair, tier: StorageTier) -> Result<()> {
        self.lock().replace(StoredCredentials::new(pair, tier))?;
        debug!(%tier, "Credentials saved");
        Ok(())
    }

    /// Install a refreshed access token in the tier that currently holds the session.
    ///
    /// A rotated refresh token replaces the old one; otherwise the old one is kept.
    /// Returns `Ok(None)` without writing anything when there is no session, so a
    /// refresh completing after a logout cannot bring the session back.
    pub fn replace_access(
        &self,
        access: String,
        rotated_refresh: Option<String>,
    ) -> Result<Option<StorageTier>> {
        let mut tiers = self.lock();
        let Some(current) = tiers.current.clone() else {
            debug!("No session to update after refresh");
            return Ok(None);
        };
        let refresh = rotated_refresh
            .filter(|r| !r.is_empty())
            .unwrap_or(current.pair.refresh);
        let Some(pair) = TokenPair::new(access, refresh) else {
            anyhow::bail!("Refreshed access token is empty");
        };
        let tier = current.tier;
        tiers.replace(StoredCredentials::new(pair, tier))?;
        debug!(%tier, "Access token replaced");
        Ok(Some(tier))
    }

    /// Empty both tiers. Safe to call any number of times.
    pub fn clear(&self) {
        let mut tiers = self.lock();
        tiers.current = None;
        if let Err(e) = tiers.remove_all() {
            warn!(error = %e, "Failed to clear stored credentials");
        } else {
            debug!("Credentials cleared");
        }
    }
}
