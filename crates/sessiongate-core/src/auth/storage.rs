//! Physical storage behind each credential tier.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use keyring::Entry;

use super::tokens::StoredCredentials;

/// Keychain service name for the durable keyring tier
const SERVICE_NAME: &str = "sessiongate";

/// Session file name in the data directory
pub const SESSION_FILE: &str = "session.json";

/// One storage tier. Callers serialize access; implementations only need `Send`.
pub trait TierBackend: Send {
    /// Read the record held by this tier, if any.
    fn load(&self) -> Result<Option<StoredCredentials>>;

    /// Overwrite whatever this tier holds.
    fn store(&self, credentials: &StoredCredentials) -> Result<()>;

    /// Empty the tier. Removing from an empty tier is not an error.
    fn remove(&self) -> Result<()>;
}

/// In-process storage, gone when the process exits.
#[derive(Default)]
pub struct MemoryBackend {
    slot: Mutex<Option<StoredCredentials>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TierBackend for MemoryBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(slot.clone())
    }

    fn store(&self, credentials: &StoredCredentials) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(credentials.clone());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        Ok(())
    }
}

/// JSON file on disk.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `session.json` inside the given directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TierBackend for FileBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&self.path).context("Failed to read session file")?;
        let credentials: StoredCredentials =
            serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(credentials))
    }

    fn store(&self, credentials: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create session directory")?;
        }
        let contents = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to remove session file")?;
        }
        Ok(())
    }
}

/// OS keychain entry holding the JSON record.
pub struct KeyringBackend {
    account: String,
}

impl KeyringBackend {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.account).context("Failed to create keyring entry")
    }
}

impl TierBackend for KeyringBackend {
    fn load(&self) -> Result<Option<StoredCredentials>> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                let credentials = serde_json::from_str(&secret)
                    .context("Failed to parse credentials from keychain")?;
                Ok(Some(credentials))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credentials from keychain"),
        }
    }

    fn store(&self, credentials: &StoredCredentials) -> Result<()> {
        let secret = serde_json::to_string(credentials)?;
        self.entry()?
            .set_password(&secret)
            .context("Failed to store credentials in keychain")
    }

    fn remove(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credentials from keychain"),
        }
    }
}

/// Backends shared by tests across the crate.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Memory tier that counts reads and removals.
    #[derive(Default)]
    pub(crate) struct CountingBackend {
        pub(crate) inner: MemoryBackend,
        pub(crate) loads: Arc<AtomicUsize>,
        pub(crate) removals: Arc<AtomicUsize>,
    }

    impl TierBackend for CountingBackend {
        fn load(&self) -> Result<Option<StoredCredentials>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load()
        }

        fn store(&self, credentials: &StoredCredentials) -> Result<()> {
            self.inner.store(credentials)
        }

        fn remove(&self) -> Result<()> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            self.inner.remove()
        }
    }
}
