//! Pull request operations: fetch, files, reviews, merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::issues::{Account, Label};
use crate::client::{next_page_url, GitHubClient};
use crate::error::ApiError;

/// File listings stop after this many pages; longer lists are resolved
/// elsewhere instead of blocking event processing on a long walk.
const MAX_FILE_PAGES: usize = 10;

/// A GitHub pull request.
///
/// The provider's own `mergeable` flag is deliberately not modeled: it is
/// null while GitHub computes it, which reads as "no" and produces false
/// negatives. Merge decisions are made from branch protection data instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request number (repository-specific)
    pub number: u64,

    /// Pull request title
    pub title: String,

    /// Pull request body (Markdown)
    pub body: Option<String>,

    /// "open" or "closed"
    pub state: String,

    /// Author of the pull request
    pub user: Account,

    /// Head branch
    pub head: PullRequestBranch,

    /// Base branch
    pub base: PullRequestBranch,

    /// Whether the pull request is a draft
    #[serde(default)]
    pub draft: bool,

    /// Whether the pull request has been merged
    #[serde(default)]
    pub merged: bool,

    /// Merge commit SHA, when GitHub has created one
    pub merge_commit_sha: Option<String>,

    /// Applied labels
    #[serde(default)]
    pub labels: Vec<Label>,

    /// Number of changed files GitHub reports
    #[serde(default)]
    pub changed_files: u64,

    /// Last update timestamp
    pub updated_at: Option<DateTime<Utc>>,

    /// Browser URL of the pull request
    pub html_url: String,
}

/// Branch information inside a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestBranch {
    /// Branch name
    #[serde(rename = "ref")]
    pub branch_ref: String,

    /// Commit SHA
    pub sha: String,

    /// Repository; absent when a fork has been deleted
    pub repo: Option<PullRequestRepo>,
}

/// Repository reference inside a pull request branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestRepo {
    /// Full repository name (owner/repo)
    pub full_name: String,
}

/// One entry of a pull request file listing.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestFile {
    /// Path of the changed file
    pub filename: String,
}

/// A pull request review.
#[derive(Debug, Clone, Deserialize)]
pub struct Review {
    /// Reviewer
    pub user: Account,

    /// "APPROVED", "CHANGES_REQUESTED", "COMMENTED", "DISMISSED", "PENDING"
    pub state: String,

    /// Submission timestamp; absent while a review is pending
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Request to merge a pull request.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MergeRequest {
    /// "merge", "squash", or "rebase"
    pub merge_method: String,

    /// SHA the pull request head must match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,

    /// Merge commit message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}

/// Request to create a review.
#[derive(Debug, Clone, Serialize)]
pub struct CreateReviewRequest {
    /// "APPROVE", "REQUEST_CHANGES", "COMMENT", or "DISMISS"
    pub event: String,

    /// Commit SHA the review applies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,

    /// Review body (Markdown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MergeResult {
    #[serde(default)]
    merged: bool,
}

impl GitHubClient {
    // ========================================================================
    // Pull Request Operations
    // ========================================================================

    /// Get a pull request by number.
    pub async fn pull_request(
        &self,
        project: &str,
        number: u64,
    ) -> Result<PullRequest, ApiError> {
        let path = format!("/repos/{project}/pulls/{number}");
        let response = self.get(&path).await?.error_for_status()?;
        response.json()
    }

    /// List the changed file names of a pull request.
    ///
    /// Walks at most [`MAX_FILE_PAGES`] pages of 100 entries; callers
    /// compare the result length against the pull request's own
    /// `changed_files` to detect truncation.
    pub async fn pull_request_files(
        &self,
        project: &str,
        number: u64,
    ) -> Result<Vec<String>, ApiError> {
        let path = format!("/repos/{project}/pulls/{number}/files?per_page=100");
        let mut next = Some(self.url_for(&path));
        let mut files = Vec::new();
        let mut pages = 0;

        while let Some(url) = next {
            if pages == MAX_FILE_PAGES {
                debug!(project, number, "file listing capped, leaving rest unfetched");
                break;
            }
            let response = self.get_url(&url).await?.error_for_status()?;
            next = next_page_url(response.headers());
            let page: Vec<PullRequestFile> = response.json()?;
            files.extend(page.into_iter().map(|file| file.filename));
            pages += 1;
        }

        Ok(files)
    }

    /// List all reviews of a pull request.
    pub async fn pull_request_reviews(
        &self,
        project: &str,
        number: u64,
    ) -> Result<Vec<Review>, ApiError> {
        let path = format!("/repos/{project}/pulls/{number}/reviews?per_page=100");
        let mut next = Some(self.url_for(&path));
        let mut reviews = Vec::new();

        while let Some(url) = next {
            let response = self.get_url(&url).await?.error_for_status()?;
            next = next_page_url(response.headers());
            let page: Vec<Review> = response.json()?;
            reviews.extend(page);
        }

        Ok(reviews)
    }

    /// Create a review on a pull request.
    pub async fn create_review(
        &self,
        project: &str,
        number: u64,
        request: &CreateReviewRequest,
    ) -> Result<(), ApiError> {
        let path = format!("/repos/{project}/pulls/{number}/reviews");
        self.post(&path, request).await?.error_for_status()?;
        debug!(project, number, event = %request.event, "created review");
        Ok(())
    }

    /// Merge a pull request.
    ///
    /// # Errors
    ///
    /// Any failure surfaces as [`ApiError::MergeFailed`]: HTTP errors carry
    /// the provider's message when the body had one, and a 200 response
    /// without `merged: true` reports that the pull request was not merged.
    pub async fn merge_pull_request(
        &self,
        project: &str,
        number: u64,
        request: &MergeRequest,
    ) -> Result<(), ApiError> {
        let path = format!("/repos/{project}/pulls/{number}/merge");
        let response = match self.put(&path, request).await {
            Ok(response) => response,
            Err(e) => {
                return Err(ApiError::MergeFailed {
                    message: e.to_string(),
                })
            }
        };

        if !response.status().is_success() {
            return Err(ApiError::MergeFailed {
                message: response.error_message(),
            });
        }

        let merged = response
            .json::<MergeResult>()
            .map(|result| result.merged)
            .unwrap_or(false);
        if !merged {
            return Err(ApiError::MergeFailed {
                message: "pull request was not merged".to_string(),
            });
        }

        debug!(project, number, "merged pull request");
        Ok(())
    }
}

#[cfg(test)]
#[path = "pulls_tests.rs"]
mod tests;
