//! Issue search, used to find pull requests by commit SHA.

use serde::Deserialize;

use crate::client::{next_page_url, GitHubClient};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
struct SearchIssuesPage {
    items: Vec<SearchIssueItem>,
}

/// One result of an issue search.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchIssueItem {
    /// Issue or pull request number
    pub number: u64,
}

impl GitHubClient {
    // ========================================================================
    // Search Operations
    // ========================================================================

    /// Search issues and pull requests, walking all result pages.
    ///
    /// Search requests are charged to their own rate limit bucket, so a
    /// caller doing many of these does not starve regular API calls.
    pub async fn search_issues(&self, query: &str) -> Result<Vec<SearchIssueItem>, ApiError> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
        let path = format!("/search/issues?q={encoded}&per_page=100");
        let mut next = Some(self.url_for(&path));
        let mut items = Vec::new();

        while let Some(url) = next {
            let response = self.get_url(&url).await?.error_for_status()?;
            next = next_page_url(response.headers());
            let page: SearchIssuesPage = response.json()?;
            items.extend(page.items);
        }

        Ok(items)
    }
}

#[cfg(test)]
#[path = "search_tests.rs"]
mod tests;
