//! In-memory cache for installation access tokens.
//!
//! One token per installation, keyed by installation ID. Entries are stored
//! with their expiry already pulled forward by the refresh headroom, so a
//! cache hit is always a token with usable remaining lifetime.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::auth::{InstallationId, InstallationToken};

/// Thread-safe installation token cache.
///
/// Tokens live for an hour; the registry inserts them with five minutes
/// shaved off the provider expiry so lookups never hand out a token that
/// could expire mid-request.
#[derive(Debug, Default)]
pub struct InstallationTokenCache {
    tokens: RwLock<HashMap<InstallationId, InstallationToken>>,
}

impl InstallationTokenCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the cached token for an installation, if still valid.
    ///
    /// Expired entries are treated as absent; the caller refreshes and
    /// re-inserts.
    pub async fn get(&self, installation_id: InstallationId) -> Option<InstallationToken> {
        let tokens = self.tokens.read().await;
        tokens
            .get(&installation_id)
            .filter(|token| !token.is_expired())
            .cloned()
    }

    /// Store a token for an installation, replacing any previous one.
    pub async fn insert(&self, installation_id: InstallationId, token: InstallationToken) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(installation_id, token);
    }

    /// Drop all expired entries.
    ///
    /// Returns how many entries were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired());
        before - tokens.len()
    }

    /// Number of cached tokens, including any not yet purged.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
