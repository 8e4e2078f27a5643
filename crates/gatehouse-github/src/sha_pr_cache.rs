//! Commit sha to pull request number cache.
//!
//! Resolving "which PR does this commit belong to" normally costs a search
//! API call, and search has its own, much smaller rate-limit bucket. This
//! cache remembers the answer per project: both the head sha and, when
//! GitHub has created one, the merge commit sha map to the PR number.
//!
//! Each project keeps at most [`MAX_SHAS_PER_PROJECT`] shas, evicting the
//! least recently used. One sha can map to several PR numbers; resolving
//! that ambiguity is the caller's problem.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::Mutex;

use crate::change::PullRequestChange;

/// Shas cached per project before least-recently-used eviction starts.
const MAX_SHAS_PER_PROJECT: usize = 4096;

#[derive(Default)]
struct ProjectShas {
    entries: HashMap<String, HashSet<u64>>,
    // Front is the least recently used sha.
    order: VecDeque<String>,
}

impl ProjectShas {
    fn touch(&mut self, sha: &str) {
        if let Some(position) = self.order.iter().position(|s| s == sha) {
            self.order.remove(position);
        }
        self.order.push_back(sha.to_string());
    }

    fn insert(&mut self, sha: &str, number: u64) {
        self.entries
            .entry(sha.to_string())
            .or_default()
            .insert(number);
        self.touch(sha);

        while self.entries.len() > MAX_SHAS_PER_PROJECT {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    fn get(&mut self, sha: &str) -> Option<HashSet<u64>> {
        let numbers = self.entries.get(sha).cloned()?;
        self.touch(sha);
        Some(numbers)
    }
}

/// Per-project LRU of commit sha → pull request numbers.
pub struct ShaPrCache {
    projects: Mutex<HashMap<String, ProjectShas>>,
}

impl ShaPrCache {
    pub fn new() -> Self {
        Self {
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Record a fetched pull request under its head sha and, when present,
    /// its merge commit sha.
    pub async fn record(&self, project: &str, change: &PullRequestChange) {
        let mut projects = self.projects.lock().await;
        let shas = projects.entry(project.to_string()).or_default();
        shas.insert(&change.head_sha, change.number.as_u64());
        if let Some(merge_sha) = &change.merge_commit_sha {
            shas.insert(merge_sha, change.number.as_u64());
        }
    }

    /// Pull request numbers recorded for a sha; empty when unknown.
    pub async fn lookup(&self, project: &str, sha: &str) -> HashSet<u64> {
        let mut projects = self.projects.lock().await;
        projects
            .get_mut(project)
            .and_then(|shas| shas.get(sha))
            .unwrap_or_default()
    }
}

impl Default for ShaPrCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "sha_pr_cache_tests.rs"]
mod tests;
