//! Issue operations: comments and labels.
//!
//! Pull requests are issues as far as comments and labels are concerned,
//! so these calls are also the write path for PR comments and labels.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::GitHubClient;
use crate::error::ApiError;

/// A GitHub account reference as it appears inside other resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account login name
    pub login: String,
}

/// An issue or pull request label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Label {
    /// Label name
    pub name: String,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

impl GitHubClient {
    // ========================================================================
    // Issue Operations
    // ========================================================================

    /// Post a comment on an issue or pull request.
    pub async fn create_comment(
        &self,
        project: &str,
        number: u64,
        body: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/repos/{project}/issues/{number}/comments");
        self.post(&path, &CreateCommentRequest { body })
            .await?
            .error_for_status()?;
        debug!(project, number, "commented on issue");
        Ok(())
    }

    /// Add a label to an issue or pull request.
    pub async fn add_label(
        &self,
        project: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/repos/{project}/issues/{number}/labels");
        self.post(&path, &vec![label]).await?.error_for_status()?;
        debug!(project, number, label, "added label");
        Ok(())
    }

    /// Remove a label from an issue or pull request.
    ///
    /// A label that is already gone (404) is not an error.
    pub async fn remove_label(
        &self,
        project: &str,
        number: u64,
        label: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/repos/{project}/issues/{number}/labels/{label}");
        let response = self.delete(&path).await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(project, number, label, "label already absent");
            return Ok(());
        }
        response.error_for_status()?;
        debug!(project, number, label, "removed label");
        Ok(())
    }
}

#[cfg(test)]
#[path = "issues_tests.rs"]
mod tests;
