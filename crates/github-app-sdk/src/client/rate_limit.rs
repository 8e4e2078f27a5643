//! Transparent handling of GitHub rate limit responses.
//!
//! GitHub signals both primary quota exhaustion and secondary (abuse)
//! rate limiting as `403 Forbidden` with a well-known message prefix in
//! the body. The guard waits out the window GitHub announces and resends
//! the request, so callers never observe these responses. Any other 403
//! is passed through untouched for the caller to handle.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use super::ApiResponse;
use crate::error::ApiError;

/// Body message prefix for primary quota exhaustion.
const RATE_LIMIT_MESSAGE: &str = "API rate limit exceeded";

/// Body message prefix for secondary rate limiting.
const ABUSE_MESSAGE: &str = "You have triggered an abuse detection";

/// Response guard that absorbs rate limit 403s by waiting and resending.
#[derive(Debug, Clone)]
pub struct RateLimitGuard {
    log_rate_limit: bool,
}

impl RateLimitGuard {
    /// Create a guard.
    ///
    /// When `log_rate_limit` is set, every response carrying rate limit
    /// headers gets its remaining quota logged at debug level.
    pub fn new(log_rate_limit: bool) -> Self {
        Self { log_rate_limit }
    }

    /// Inspect a response and absorb rate limit 403s.
    ///
    /// Loops until the response is something other than a recognized rate
    /// limit rejection, waiting out each announced window before calling
    /// `resend`. There is no upper bound on the number of waits; the rate
    /// limit always resets eventually and giving up early would fail the
    /// request for no reason.
    pub async fn handle<F, Fut>(
        &self,
        url: &str,
        response: ApiResponse,
        resend: F,
    ) -> Result<ApiResponse, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ApiResponse, ApiError>>,
    {
        let mut response = response;
        loop {
            if response.headers().contains_key("x-ratelimit-limit") {
                self.log_quota(url, &response);
            }

            if response.status() != StatusCode::FORBIDDEN {
                return Ok(response);
            }

            let body: serde_json::Value = match serde_json::from_slice(response.body()) {
                Ok(body) => body,
                Err(_) => {
                    warn!(%url, "could not decode a 403 response body");
                    return Ok(response);
                }
            };
            let message = body.get("message").and_then(|m| m.as_str()).unwrap_or("");

            if message.starts_with(RATE_LIMIT_MESSAGE) {
                let Some(wait) = rate_limit_wait(&response) else {
                    return Ok(response);
                };
                warn!(
                    wait_secs = wait.as_secs(),
                    "API rate limit reached, waiting before resending"
                );
                tokio::time::sleep(wait).await;
                response = resend().await?;
            } else if message.starts_with(ABUSE_MESSAGE) {
                let Some(retry_after) = retry_after_secs(&response) else {
                    error!("missing retry-after header while handling an abuse error");
                    return Ok(response);
                };
                error!(
                    retry_after,
                    "abuse detection triggered, waiting before resending"
                );
                tokio::time::sleep(Duration::from_secs(retry_after + 1)).await;
                response = resend().await?;
            } else {
                // Every other 403 is for the caller to handle.
                return Ok(response);
            }
        }
    }

    /// Log the remaining quota for the bucket this request was charged to.
    ///
    /// This path must never fail a request; missing or unreadable headers
    /// are logged as empty fields.
    fn log_quota(&self, url: &str, response: &ApiResponse) {
        if !self.log_rate_limit {
            return;
        }

        let remaining = response.header_str("x-ratelimit-remaining").unwrap_or("");
        let reset = response.header_str("x-ratelimit-reset").unwrap_or("");
        debug!(
            resource = rate_limit_resource(url),
            remaining, reset, "GitHub API rate limit"
        );
    }
}

/// Seconds to wait until the primary quota resets, from `x-ratelimit-reset`.
///
/// Waits one extra second past the announced epoch so the reset has really
/// happened by the time we resend. `None` if the header is missing or
/// unparseable, in which case the 403 goes back to the caller.
fn rate_limit_wait(response: &ApiResponse) -> Option<Duration> {
    let reset = response.header_str("x-ratelimit-reset")?.parse::<i64>().ok()?;
    let wait = reset - Utc::now().timestamp() + 1;
    Some(Duration::from_secs(wait.max(0) as u64))
}

fn retry_after_secs(response: &ApiResponse) -> Option<u64> {
    response.header_str("retry-after")?.parse::<u64>().ok()
}

/// Which rate limit bucket a request URL is charged to.
///
/// The search API has its own quota; everything else shares the core
/// bucket. Enterprise installs prefix paths with `/api/v3`.
fn rate_limit_resource(url: &str) -> &'static str {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.to_string(),
    };
    let path = path.strip_prefix("/api/v3").unwrap_or(&path);
    if path.starts_with("/search/") {
        "search"
    } else {
        "core"
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
