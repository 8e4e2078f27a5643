//! Normalized change model.
//!
//! A change is the connector's view of a reviewable or trackable unit: a
//! pull request, or a pushed ref (branch, tag, or anything else under
//! `refs/`). Pull request changes live in the [`ChangeCache`] and are only
//! mutated through its refresh path; ref changes are built directly from
//! push events.
//!
//! [`ChangeCache`]: crate::change_cache::ChangeCache

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use github_app_sdk::StatusContext;
use serde::{Deserialize, Serialize};

use crate::error::ConnectionError;

/// A pull request number as it appears in a change key.
///
/// Numbers arrive from different sources (webhook payloads carry integers,
/// manual enqueues carry strings) and must compare equal either way, so
/// every entry point coerces through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeNumber(u64);

impl ChangeNumber {
    pub fn new(number: u64) -> Self {
        Self(number)
    }

    /// Coerce a JSON value (integer or numeric string) to a change number.
    pub fn coerce(value: &serde_json::Value) -> Result<Self, ConnectionError> {
        let number = match value {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        number
            .map(Self)
            .ok_or_else(|| ConnectionError::InvalidChangeNumber {
                value: value.to_string(),
            })
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChangeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChangeNumber {
    fn from(number: u64) -> Self {
        Self(number)
    }
}

/// A reviewable or trackable unit.
#[derive(Debug, Clone)]
pub enum Change {
    /// A pull request, shared out of the change cache.
    PullRequest(Arc<PullRequestChange>),

    /// A pushed ref (branch, tag, or bare ref).
    Ref(RefChange),
}

impl Change {
    /// Full repository name the change belongs to.
    pub fn project(&self) -> &str {
        match self {
            Self::PullRequest(change) => &change.project,
            Self::Ref(change) => &change.project,
        }
    }

    /// Git ref the change tracks.
    pub fn ref_name(&self) -> &str {
        match self {
            Self::PullRequest(change) => &change.ref_name,
            Self::Ref(change) => &change.ref_name,
        }
    }

    /// Browser URL of the change.
    pub fn url(&self) -> &str {
        match self {
            Self::PullRequest(change) => &change.url,
            Self::Ref(change) => &change.url,
        }
    }
}

/// One reviewer's collapsed vote on a pull request.
///
/// Multiple reviews by the same login collapse to one entry: the newest
/// wins, except a trailing comment never displaces an earlier vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReview {
    /// Reviewer login.
    pub login: String,

    /// Lowercased review state: "approved", "changes_requested",
    /// "commented", "dismissed".
    pub kind: String,

    /// When the review was submitted; absent for pending reviews.
    pub submitted_at: Option<DateTime<Utc>>,

    /// Reviewer's repository permission: "read", "write", or "admin".
    pub permission: String,
}

/// A cached pull request change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestChange {
    /// Full repository name (owner/repo).
    pub project: String,

    /// Pull request number.
    pub number: ChangeNumber,

    /// Head commit sha this cache entry is bound to; `None` tracks the
    /// latest revision.
    pub patchset: Option<String>,

    /// Head commit sha reported by the last fetch.
    pub head_sha: String,

    /// Merge commit sha, when GitHub has created one.
    pub merge_commit_sha: Option<String>,

    /// Git ref of the pull request head (`refs/pull/{number}/head`).
    pub ref_name: String,

    /// Base branch the pull request targets.
    pub branch: String,

    /// Pull request title.
    pub title: String,

    /// Title and body combined into one commit-message-shaped string.
    pub message: String,

    /// Author login.
    pub owner: String,

    /// Whether the pull request is open.
    pub open: bool,

    /// Whether the pull request has been merged. Monotonic: refreshes only
    /// ever set this from false to true.
    pub is_merged: bool,

    /// Whether the pull request is a draft.
    pub draft: bool,

    /// Applied label names.
    pub labels: Vec<String>,

    /// Collapsed reviews, keyed by reviewer login.
    pub reviews: HashMap<String, ChangeReview>,

    /// Changed file names. `None` means the provider truncated the list
    /// and the files must be resolved out-of-band.
    pub files: Option<Vec<String>>,

    /// Last-update timestamp from the provider. Never reset to `None` once
    /// set; see [`carry_over`](Self::carry_over).
    pub updated_at: Option<DateTime<Utc>>,

    /// Status contexts and check runs reported on the head commit.
    pub contexts: HashSet<StatusContext>,

    /// Contexts required by branch protection on the base branch.
    pub required_contexts: HashSet<String>,

    /// Whether the base branch carries a protection rule.
    pub branch_protected: bool,

    /// Provider-computed review decision ("APPROVED",
    /// "REVIEW_REQUIRED", "CHANGES_REQUESTED"), when review rules apply.
    pub review_decision: Option<String>,

    /// Browser URL of the pull request.
    pub url: String,
}

impl PullRequestChange {
    /// Names of the contexts currently reporting success.
    pub fn successful_contexts(&self) -> HashSet<String> {
        self.contexts
            .iter()
            .filter(|context| context.is_successful())
            .map(|context| context.name.clone())
            .collect()
    }

    /// Carry monotonic state over from the previous cache generation.
    ///
    /// A refresh races with merge reporting and with GitHub's own moving
    /// `updated_at` target, so three fields are sticky:
    /// - `is_merged` never goes back to false;
    /// - `updated_at` is never cleared once set (a fresh value does win);
    /// - a previously resolved file list is kept, because the entry is
    ///   bound to one revision and its files cannot change.
    pub fn carry_over(&mut self, prior: &PullRequestChange) {
        if prior.is_merged {
            self.is_merged = true;
        }
        if self.updated_at.is_none() {
            self.updated_at = prior.updated_at;
        }
        if let Some(prior_files) = &prior.files {
            if !prior_files.is_empty() {
                self.files = Some(prior_files.clone());
            }
        }
    }
}

impl fmt::Display for PullRequestChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.number)
    }
}

/// Kind of a pushed ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefKind {
    /// `refs/heads/*`
    Branch,

    /// `refs/tags/*`
    Tag,

    /// Anything else under `refs/`
    Ref,
}

/// A change built from a push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefChange {
    /// Full repository name (owner/repo).
    pub project: String,

    /// Branch, tag, or bare ref.
    pub kind: RefKind,

    /// Full ref string as pushed.
    pub ref_name: String,

    /// Short name for branches and tags; `None` for bare refs.
    pub name: Option<String>,

    /// State of the ref before the push (all zeros for a created ref).
    pub old_sha: String,

    /// State of the ref after the push (all zeros for a deleted ref).
    pub new_sha: String,

    /// File names touched across the pushed commits.
    pub files: Vec<String>,

    /// Browser URL: the tag release page for tags, the commit page
    /// otherwise.
    pub url: String,
}

impl RefChange {
    /// Build a ref change from push event data.
    ///
    /// `server_url` is the browser-facing host, e.g. `https://github.com`.
    pub fn from_push(
        server_url: &str,
        project: &str,
        ref_name: &str,
        old_sha: &str,
        new_sha: &str,
        files: Vec<String>,
    ) -> Self {
        let (kind, name) = if let Some(branch) = ref_name.strip_prefix("refs/heads/") {
            (RefKind::Branch, Some(branch.to_string()))
        } else if let Some(tag) = ref_name.strip_prefix("refs/tags/") {
            (RefKind::Tag, Some(tag.to_string()))
        } else {
            (RefKind::Ref, None)
        };

        let url = match (&kind, &name) {
            (RefKind::Tag, Some(tag)) => {
                format!("{server_url}/{project}/releases/tag/{tag}")
            }
            _ => format!("{server_url}/{project}/commit/{new_sha}"),
        };

        Self {
            project: project.to_string(),
            kind,
            ref_name: ref_name.to_string(),
            name,
            old_sha: old_sha.to_string(),
            new_sha: new_sha.to_string(),
            files,
            url,
        }
    }
}

/// Combine a title and body into one commit-message-shaped string.
///
/// Empty pieces collapse away; the result is never missing, only possibly
/// empty.
pub(crate) fn compose_message(title: &str, body: Option<&str>) -> String {
    let body = body.unwrap_or("");
    if title.is_empty() {
        return body.to_string();
    }
    if body.is_empty() {
        return title.to_string();
    }
    format!("{title}\n\n{body}")
}

#[cfg(test)]
#[path = "change_tests.rs"]
mod tests;
