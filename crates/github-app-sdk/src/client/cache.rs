//! ETag-revalidated response cache.
//!
//! GitHub's `Cache-Control: max-age` guidance is too aggressive for a
//! near-real-time system, so stored responses have that header dropped and
//! every request revalidates with `If-None-Match`. A `304 Not Modified`
//! is answered from the stored body and does not count against the rate
//! limit quota.

use std::collections::HashMap;

use reqwest::header::{CACHE_CONTROL, ETAG};
use tokio::sync::RwLock;

use super::ApiResponse;

/// A cache entry paired with the ETag to revalidate it with.
#[derive(Debug, Clone)]
pub(crate) struct CachedResponse {
    pub(crate) etag: String,
    pub(crate) response: ApiResponse,
}

/// Shared response cache keyed by request URL.
///
/// Only successful GET responses that carry an `ETag` header are stored.
/// Entries are replaced on revalidation misses and never expire on their
/// own, mirroring an ETag-only caching adapter.
#[derive(Debug, Default)]
pub(crate) struct EtagCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
}

impl EtagCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Look up the stored response for a URL, if any.
    pub(crate) async fn lookup(&self, url: &str) -> Option<CachedResponse> {
        self.entries.read().await.get(url).cloned()
    }

    /// Store a response if it is cacheable.
    ///
    /// Responses without an ETag are ignored. The `Cache-Control` header is
    /// stripped from the stored copy so freshness is always ETag-revalidated,
    /// never time-based.
    pub(crate) async fn store(&self, url: &str, response: &ApiResponse) {
        let etag = match response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
        {
            Some(etag) => etag.to_string(),
            None => return,
        };

        let mut sanitized = response.clone();
        sanitized.headers_mut().remove(CACHE_CONTROL);

        self.entries.write().await.insert(
            url.to_string(),
            CachedResponse {
                etag,
                response: sanitized,
            },
        );
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
