//! Check run operations.
//!
//! Check runs require app authentication; callers without app credentials
//! must not reach these endpoints. That gate lives with the caller, which
//! knows its own authentication mode.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::GitHubClient;
use crate::error::ApiError;

/// Preview media type that unlocks the check run endpoints.
const CHECKS_PREVIEW_ACCEPT: &str = "application/vnd.github.antiope-preview+json";

/// A check run as reported by the check run listing.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRun {
    /// Check run id
    pub id: u64,

    /// Check run name
    pub name: String,

    /// App that owns the check run
    pub app: Option<CheckApp>,

    /// "queued", "in_progress", or "completed"
    pub status: String,

    /// Conclusion; absent until the run completes
    pub conclusion: Option<String>,

    /// Opaque id the creating integration attached
    pub external_id: Option<String>,

    /// Link attached to the check run
    pub details_url: Option<String>,
}

/// The app that owns a check run.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckApp {
    /// App slug; absent for deleted integrations
    pub slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunPage {
    check_runs: Vec<CheckRun>,
}

#[derive(Debug, Deserialize)]
struct CheckRunId {
    id: u64,
}

/// Output block of a check run: a summary plus optional annotations.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRunOutput {
    /// Output title
    pub title: String,

    /// Output summary (Markdown)
    pub summary: String,

    /// Line annotations to attach
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<CheckRunAnnotation>,
}

/// One line annotation of a check run output.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRunAnnotation {
    /// File path the annotation applies to
    pub path: String,

    /// "notice", "warning", or "failure"
    pub annotation_level: String,

    /// Annotation text
    pub message: String,

    /// First annotated line
    pub start_line: u64,

    /// Last annotated line
    pub end_line: u64,

    /// First annotated column; only valid on single-line annotations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_column: Option<u64>,

    /// Last annotated column; only valid on single-line annotations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_column: Option<u64>,
}

/// A requested action button on a check run.
#[derive(Debug, Clone, Serialize)]
pub struct CheckRunAction {
    /// Button label
    pub label: String,

    /// Button description
    pub description: String,

    /// Identifier delivered back in `requested_action` webhook events
    pub identifier: String,
}

/// Request to create a check run.
#[derive(Debug, Clone, Serialize)]
pub struct CreateCheckRunRequest {
    /// Check run name
    pub name: String,

    /// Commit SHA the check run applies to
    pub head_sha: String,

    /// "queued", "in_progress", or "completed"; set for unfinished runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Conclusion; set for completed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,

    /// Completion timestamp; set for completed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Output block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CheckRunOutput>,

    /// Link to attach to the check run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,

    /// Opaque id to attach to the check run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Requested action buttons
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<CheckRunAction>,
}

/// Request to update an existing check run.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheckRunRequest {
    /// Conclusion; set for completed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<String>,

    /// Completion timestamp; set for completed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Output block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CheckRunOutput>,

    /// Link to attach to the check run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_url: Option<String>,

    /// Opaque id to attach to the check run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Requested action buttons
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<CheckRunAction>,
}

impl GitHubClient {
    // ========================================================================
    // Check Run Operations
    // ========================================================================

    /// List the check runs reported for a commit.
    ///
    /// Fetches a single page of 100 entries.
    pub async fn commit_check_runs(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Vec<CheckRun>, ApiError> {
        let path = format!("/repos/{project}/commits/{sha}/check-runs?per_page=100");
        let response = self
            .get_with_accept(&path, CHECKS_PREVIEW_ACCEPT)
            .await?
            .error_for_status()?;
        let page: CheckRunPage = response.json()?;
        Ok(page.check_runs)
    }

    /// Create a check run, returning its id.
    pub async fn create_check_run(
        &self,
        project: &str,
        request: &CreateCheckRunRequest,
    ) -> Result<u64, ApiError> {
        let path = format!("/repos/{project}/check-runs");
        let response = self
            .request(
                Method::POST,
                &path,
                Some(serde_json::to_value(request)?),
                Some(CHECKS_PREVIEW_ACCEPT),
            )
            .await?
            .error_for_status()?;
        let created: CheckRunId = response.json()?;
        debug!(project, id = created.id, name = %request.name, "created check run");
        Ok(created.id)
    }

    /// Update an existing check run, returning its id.
    pub async fn update_check_run(
        &self,
        project: &str,
        check_run_id: u64,
        request: &UpdateCheckRunRequest,
    ) -> Result<u64, ApiError> {
        let path = format!("/repos/{project}/check-runs/{check_run_id}");
        let response = self
            .request(
                Method::PATCH,
                &path,
                Some(serde_json::to_value(request)?),
                Some(CHECKS_PREVIEW_ACCEPT),
            )
            .await?
            .error_for_status()?;
        let updated: CheckRunId = response.json()?;
        debug!(project, id = updated.id, "updated check run");
        Ok(updated.id)
    }
}

#[cfg(test)]
#[path = "checks_tests.rs"]
mod tests;
