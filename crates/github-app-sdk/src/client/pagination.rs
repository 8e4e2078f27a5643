//! Link-header pagination support for GitHub API walks.
//!
//! GitHub returns paginated results with `Link` headers for navigation.
//! Listing operations follow the `rel="next"` URL until it disappears.

use reqwest::header::{HeaderMap, LINK};

/// Pagination URLs extracted from a `Link` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// URL for next page (if available)
    pub next: Option<String>,

    /// URL for previous page (if available)
    pub prev: Option<String>,

    /// URL for first page (if available)
    pub first: Option<String>,

    /// URL for last page (if available)
    pub last: Option<String>,
}

impl Pagination {
    /// Check if there are more pages available.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Parse pagination metadata from a `Link` header value.
///
/// GitHub returns Link headers like:
/// `<https://api.github.com/resource?page=2>; rel="next", <https://api.github.com/resource?page=5>; rel="last"`
pub fn parse_link_header(link_header: Option<&str>) -> Pagination {
    let mut pagination = Pagination::default();

    if let Some(header) = link_header {
        for link in header.split(',') {
            let parts: Vec<&str> = link.split(';').collect();
            if parts.len() != 2 {
                continue;
            }

            let url = parts[0]
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>');
            let rel = parts[1]
                .trim()
                .trim_start_matches("rel=\"")
                .trim_end_matches('"');

            match rel {
                "next" => pagination.next = Some(url.to_string()),
                "prev" => pagination.prev = Some(url.to_string()),
                "first" => pagination.first = Some(url.to_string()),
                "last" => pagination.last = Some(url.to_string()),
                _ => {}
            }
        }
    }

    pagination
}

/// Extract the `rel="next"` URL from response headers, if any.
///
/// Returns `None` when the `Link` header is absent, unreadable, or carries
/// no next relation, which ends a pagination walk.
pub fn next_page_url(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(LINK)?.to_str().ok()?;
    parse_link_header(Some(value)).next
}

#[cfg(test)]
#[path = "pagination_tests.rs"]
mod tests;
