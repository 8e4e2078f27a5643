//! Repository operations: branches, branch protection, permissions.

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{error, warn};

use crate::client::{next_page_url, GitHubClient};
use crate::error::ApiError;

/// Preview media type for protected-branch filtering and protection data.
const PROTECTION_PREVIEW_ACCEPT: &str = "application/vnd.github.loki-preview+json";

/// Preview media type for the collaborator permission endpoint.
const PERMISSION_PREVIEW_ACCEPT: &str = "application/vnd.github.korra-preview";

#[derive(Debug, Deserialize)]
struct BranchRecord {
    name: String,
}

/// Branch protection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchProtection {
    /// Required status checks, when the rule sets any
    pub required_status_checks: Option<RequiredStatusChecks>,
}

/// The required status check block of a protection rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RequiredStatusChecks {
    /// Status context names that must succeed
    pub contexts: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PermissionResponse {
    permission: Option<String>,
}

impl GitHubClient {
    // ========================================================================
    // Repository Operations
    // ========================================================================

    /// List branch names of a project.
    ///
    /// With `exclude_unprotected` only protected branches are returned.
    /// A 403 during the walk is treated as an empty branch list so one
    /// throttled project cannot wedge a reconfiguration; a 404 means the
    /// project itself is gone and raises.
    pub async fn list_branches(
        &self,
        project: &str,
        exclude_unprotected: bool,
    ) -> Result<Vec<String>, ApiError> {
        let mut path = format!("/repos/{project}/branches?per_page=100");
        if exclude_unprotected {
            path.push_str("&protected=1");
        }
        let mut next = Some(self.url_for(&path));
        let mut branches = Vec::new();

        while let Some(url) = next {
            let response = self.get_url_with_accept(&url, PROTECTION_PREVIEW_ACCEPT).await?;
            if response.status() == StatusCode::FORBIDDEN {
                error!(project, "got 403 listing branches, using empty branch list");
                let remaining = response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok());
                if remaining == Some("0") {
                    warn!(project, "rate limit exhausted while listing branches");
                }
                return Ok(Vec::new());
            }
            if response.status() == StatusCode::NOT_FOUND {
                return Err(ApiError::NotFound {
                    resource: format!("branches of project {project}"),
                });
            }
            let response = response.error_for_status()?;
            next = next_page_url(response.headers());
            let page: Vec<BranchRecord> = response.json()?;
            branches.extend(page.into_iter().map(|branch| branch.name));
        }

        Ok(branches)
    }

    /// Get the protection rule of a branch, or `None` when it has none.
    pub async fn branch_protection(
        &self,
        project: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, ApiError> {
        let path = format!("/repos/{project}/branches/{branch}/protection");
        let response = self.get_with_accept(&path, PROTECTION_PREVIEW_ACCEPT).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.json()?))
    }

    /// Look up the repository permission of an account.
    ///
    /// Returns "admin", "write", "read", or "none"; accounts GitHub does
    /// not know as collaborators come back as "none".
    pub async fn collaborator_permission(
        &self,
        project: &str,
        login: &str,
    ) -> Result<String, ApiError> {
        let path = format!("/repos/{project}/collaborators/{login}/permission");
        let response = self.get_with_accept(&path, PERMISSION_PREVIEW_ACCEPT).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok("none".to_string());
        }
        let response = response.error_for_status()?;
        let parsed: PermissionResponse = response.json()?;
        Ok(parsed.permission.unwrap_or_else(|| "none".to_string()))
    }
}

#[cfg(test)]
#[path = "repos_tests.rs"]
mod tests;
