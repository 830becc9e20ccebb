use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access + refresh credentials issued by the identity service.
///
/// Both halves are always present; an empty string is not a token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    /// Build a pair, returning `None` if either half is empty.
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Option<Self> {
        let access = access.into();
        let refresh = refresh.into();
        if access.is_empty() || refresh.is_empty() {
            return None;
        }
        Some(Self { access, refresh })
    }
}

// Tokens never end up in logs.
impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &"<redacted>")
            .field("refresh", &"<redacted>")
            .finish()
    }
}

/// Where the live token pair is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    /// Survives a process restart ("remember me").
    Durable,
    /// Scoped to the current process.
    Ephemeral,
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageTier::Durable => write!(f, "durable"),
            StorageTier::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

/// The record written into a tier: the pair plus the tier tag it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub tier: StorageTier,
    #[serde(flatten)]
    pub pair: TokenPair,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl StoredCredentials {
    pub fn new(pair: TokenPair, tier: StorageTier) -> Self {
        Self {
            tier,
            pair,
            saved_at: Utc::now(),
        }
    }

    /// A record read back from storage is only usable if both tokens are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.pair.access.is_empty() && !self.pair.refresh.is_empty()
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.saved_at).num_minutes()
    }

    /// Human-readable age of the credentials ("just now", "5m ago", "2h ago", "3d ago").
    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}
