//! Commit status operations.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::issues::Account;
use crate::client::GitHubClient;
use crate::error::ApiError;

/// A commit status as reported by the statuses listing.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitStatus {
    /// Account that created the status; absent for some integrations
    pub creator: Option<Account>,

    /// Status context name
    pub context: String,

    /// "pending", "success", "failure", or "error"
    pub state: String,

    /// Link attached to the status
    pub target_url: Option<String>,

    /// Short description of the status
    pub description: Option<String>,
}

/// Request to set a commit status.
#[derive(Debug, Clone, Serialize)]
pub struct CreateStatusRequest {
    /// "pending", "success", "failure", or "error"
    pub state: String,

    /// Link to attach to the status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,

    /// Short description of the status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Status context name
    pub context: String,
}

impl GitHubClient {
    // ========================================================================
    // Commit Status Operations
    // ========================================================================

    /// List the statuses reported for a commit.
    ///
    /// Fetches a single page of 100 entries. Status lists beyond that are
    /// dominated by superseded duplicates, which callers drop anyway.
    pub async fn commit_statuses(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Vec<CommitStatus>, ApiError> {
        let path = format!("/repos/{project}/commits/{sha}/statuses?per_page=100");
        let response = self.get(&path).await?.error_for_status()?;
        response.json()
    }

    /// Set a status on a commit.
    pub async fn create_commit_status(
        &self,
        project: &str,
        sha: &str,
        request: &CreateStatusRequest,
    ) -> Result<(), ApiError> {
        let path = format!("/repos/{project}/statuses/{sha}");
        self.post(&path, request).await?.error_for_status()?;
        debug!(project, sha, context = %request.context, "set commit status");
        Ok(())
    }
}

#[cfg(test)]
#[path = "statuses_tests.rs"]
mod tests;
