//! Retries for GET requests that fail with server errors.
//!
//! Only GET requests are retried. Other methods like POST may already
//! have altered state on the server side, so a retry could apply the
//! change twice. Delays follow an exponential backoff capped at a
//! configurable maximum.

use std::future::Future;
use std::time::Duration;

use reqwest::Method;
use tracing::{error, warn};

use super::ApiResponse;
use crate::error::ApiError;

/// Response guard that retries failed GETs with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryGuard {
    max_retries: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryGuard {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5), Duration::from_secs(30))
    }
}

impl RetryGuard {
    /// Create a guard with explicit limits.
    ///
    /// The first retry waits `initial_delay`; each subsequent delay doubles
    /// up to `max_delay`.
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Inspect a response and retry server errors on GET requests.
    ///
    /// Responses that describe a permanently unavailable pull request diff
    /// are returned as-is since no amount of retrying makes GitHub able to
    /// generate the diff. Once `max_retries` resends have been spent the
    /// last response is handed to the caller.
    pub async fn handle<F, Fut>(
        &self,
        method: &Method,
        response: ApiResponse,
        resend: F,
    ) -> Result<ApiResponse, ApiError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ApiResponse, ApiError>>,
    {
        if *method != Method::GET {
            return Ok(response);
        }

        let mut response = response;
        let mut retries = 0u32;
        let mut delay = self.initial_delay;
        while response.status().is_server_error() {
            if is_permanent_diff_error(&response) {
                return Ok(response);
            }
            if retries >= self.max_retries {
                error!(
                    status = response.status().as_u16(),
                    retries,
                    max_retries = self.max_retries,
                    "GET request failed, won't retry again"
                );
                return Ok(response);
            }
            warn!(
                status = response.status().as_u16(),
                retries,
                max_retries = self.max_retries,
                delay_secs = delay.as_secs(),
                "GET request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            retries += 1;
            response = resend().await?;
            delay = (delay * 2).min(self.max_delay);
        }

        Ok(response)
    }
}

/// Check for the structured error GitHub sends when a pull request diff
/// cannot be generated.
///
/// GitHub answers 500 when the diff is too large to produce, so these
/// responses must not be retried.
fn is_permanent_diff_error(response: &ApiResponse) -> bool {
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(response.body()) else {
        return false;
    };
    let Some(errors) = body.get("errors").and_then(|e| e.as_array()) else {
        return false;
    };
    errors.iter().any(|error| {
        error.get("resource").and_then(|v| v.as_str()) == Some("PullRequest")
            && error.get("field").and_then(|v| v.as_str()) == Some("diff")
            && error.get("code").and_then(|v| v.as_str()) == Some("not_available")
    })
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
