//! Authoritative in-memory store of pull request changes.
//!
//! Keyed by (project, number, patchset). Webhook preprocessing is
//! concurrent, so two events about the same pull request can ask for a
//! refresh at the same time; a per-key update lock makes one of them do
//! the network work while the other waits and then reads the stored
//! result. Entries are immutable snapshots behind `Arc`: readers never
//! observe a half-written change.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::change::{ChangeNumber, PullRequestChange};
use crate::error::ConnectionError;

/// Cache key of a pull request change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeKey {
    pub project: String,
    pub number: ChangeNumber,
    /// Head sha the entry is bound to; `None` tracks the latest revision.
    pub patchset: Option<String>,
}

impl ChangeKey {
    pub fn new(project: &str, number: ChangeNumber, patchset: Option<&str>) -> Self {
        Self {
            project: project.to_string(),
            number,
            patchset: patchset.map(|p| p.to_string()),
        }
    }
}

impl fmt::Display for ChangeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.patchset {
            Some(patchset) => write!(f, "{}#{}@{}", self.project, self.number, patchset),
            None => write!(f, "{}#{}", self.project, self.number),
        }
    }
}

/// Change store with per-key single-flight refresh.
pub struct ChangeCache {
    changes: Mutex<HashMap<ChangeKey, Arc<PullRequestChange>>>,
    update_locks: Mutex<HashMap<ChangeKey, Arc<Mutex<()>>>>,
}

impl ChangeCache {
    pub fn new() -> Self {
        Self {
            changes: Mutex::new(HashMap::new()),
            update_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Get a change, fetching or refreshing it through `fetch` as needed.
    ///
    /// A cache hit without `refresh` returns immediately. Otherwise the
    /// caller competes for the key's update lock: the winner runs `fetch`,
    /// stores the result (with monotonic fields carried over from the
    /// previous generation) and releases; losers wait for the winner and
    /// read its stored result without fetching again. A fetch failure
    /// removes the entry, so waiting losers see the miss and report the
    /// change as unavailable.
    pub async fn get<F, Fut>(
        &self,
        key: &ChangeKey,
        refresh: bool,
        fetch: F,
    ) -> Result<Arc<PullRequestChange>, ConnectionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PullRequestChange, ConnectionError>>,
    {
        if !refresh {
            if let Some(existing) = self.changes.lock().await.get(key) {
                return Ok(existing.clone());
            }
        }

        let lock = self
            .update_locks
            .lock()
            .await
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let outcome = match lock.try_lock() {
            Ok(_guard) => {
                let result = fetch().await;
                // Remove the lock entry before releasing so it cannot leak;
                // late arrivals create a fresh one.
                self.update_locks.lock().await.remove(key);

                match result {
                    Ok(mut fresh) => {
                        let mut changes = self.changes.lock().await;
                        if let Some(prior) = changes.get(key) {
                            fresh.carry_over(prior);
                        }
                        let stored = Arc::new(fresh);
                        changes.insert(key.clone(), stored.clone());
                        Ok(stored)
                    }
                    Err(e) => {
                        self.changes.lock().await.remove(key);
                        Err(e)
                    }
                }
            }
            Err(_) => {
                // Another task is updating this very change right now and
                // would fetch the same data again; wait for it instead.
                debug!(change = %key, "change is currently being updated, waiting for it to finish");
                let _wait = lock.lock().await;
                debug!(change = %key, "finished waiting for change update");

                self.changes
                    .lock()
                    .await
                    .get(key)
                    .cloned()
                    .ok_or(ConnectionError::ChangeNotFound {
                        project: key.project.clone(),
                        number: key.number.as_u64(),
                    })
            }
        };
        outcome
    }

    /// Read a change without fetching.
    pub async fn get_cached(&self, key: &ChangeKey) -> Option<Arc<PullRequestChange>> {
        self.changes.lock().await.get(key).cloned()
    }

    /// Replace a cached change with a modified copy.
    ///
    /// Used for out-of-band state changes that must not wait for a full
    /// refresh, like flagging a change merged right after the merge call
    /// succeeded. Returns the new snapshot, or `None` when the key is not
    /// cached.
    pub async fn modify<F>(&self, key: &ChangeKey, apply: F) -> Option<Arc<PullRequestChange>>
    where
        F: FnOnce(&mut PullRequestChange),
    {
        let mut changes = self.changes.lock().await;
        let entry = changes.get_mut(key)?;
        let mut updated = (**entry).clone();
        apply(&mut updated);
        *entry = Arc::new(updated);
        Some(entry.clone())
    }

    /// Flag a cached change as merged.
    pub async fn mark_merged(&self, key: &ChangeKey) {
        self.modify(key, |change| change.is_merged = true).await;
    }

    /// Drop every key not in the given set.
    pub async fn retain(&self, relevant: &HashSet<ChangeKey>) {
        self.changes
            .lock()
            .await
            .retain(|key, _| relevant.contains(key));
    }

    /// Number of cached changes.
    pub async fn len(&self) -> usize {
        self.changes.lock().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.changes.lock().await.is_empty()
    }
}

impl Default for ChangeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "change_cache_tests.rs"]
mod tests;
