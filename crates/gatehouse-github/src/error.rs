//! Error types for the GitHub connector.
//!
//! Three concerns, three enums: configuration loading/validation, connection
//! facade operations, and webhook payload intake. The payload errors carry
//! an `IntoResponse` impl so the router can reject a delivery with the
//! correct status code and a JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use github_app_sdk::{ApiError, AuthError, SignatureError};
use thiserror::Error;
use tracing::warn;

/// Errors raised while loading or validating connector configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration is self-contradictory or out of range.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// The App private key file could not be read or parsed.
    #[error("Failed to load app key from {path}: {message}")]
    KeyFile { path: String, message: String },

    /// A configuration source failed to load or deserialize.
    #[error("Configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors surfaced by `GitHubConnection` operations.
///
/// Most variants wrap SDK errors and keep their retry classification; the
/// connector-specific variants are all permanent.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A GitHub API call failed after the client guards gave up.
    #[error("GitHub API error: {0}")]
    Api(#[from] ApiError),

    /// Authentication against GitHub failed.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// A pull request could not be retrieved after repeated attempts.
    #[error("Failed to retrieve pull request #{number} of {project}")]
    ChangeNotFound { project: String, number: u64 },

    /// More than one open pull request matched a commit sha.
    #[error("Multiple pulls found with head sha {sha}")]
    AmbiguousSha { sha: String },

    /// A change key could not be coerced to an integer change number.
    #[error("Change number {value} is not an integer")]
    InvalidChangeNumber { value: String },

    /// A webhook payload was not valid JSON.
    #[error("Invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Configuration problem discovered while building the connection.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The event pipeline is not running.
    #[error("Event intake is stopped")]
    Stopped,
}

impl ConnectionError {
    /// Check if this error represents a transient condition that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient(),
            Self::Auth(e) => e.is_transient(),
            Self::ChangeNotFound { .. } => false,
            Self::AmbiguousSha { .. } => false,
            Self::InvalidChangeNumber { .. } => false,
            Self::Payload(_) => false,
            Self::Config(_) => false,
            Self::Stopped => false,
        }
    }
}

/// Webhook payload endpoint errors with HTTP status mapping.
///
/// - `401 Unauthorized`: signature missing, mismatched, or unverifiable.
///   The sender sees the rejection reason but never the expected digest.
/// - `400 Bad Request`: the delivery did not name an event type.
/// - `503 Service Unavailable`: intake queue closed (shutdown in progress);
///   GitHub will redeliver.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// Signature validation failed.
    #[error("Signature validation failed: {0}")]
    Unauthorized(#[from] SignatureError),

    /// No webhook token is configured, deliveries cannot be authenticated.
    #[error("Webhook token is not configured")]
    TokenNotConfigured,

    /// The X-GitHub-Event header was absent.
    #[error("Missing X-GitHub-Event header")]
    MissingEventHeader,

    /// The intake queue is no longer accepting events.
    #[error("Event intake unavailable")]
    IntakeUnavailable,
}

impl IntoResponse for PayloadError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string(), None),
            Self::TokenNotConfigured => (StatusCode::UNAUTHORIZED, self.to_string(), None),
            Self::MissingEventHeader => (StatusCode::BAD_REQUEST, self.to_string(), None),
            Self::IntakeUnavailable => {
                warn!("webhook delivery rejected, event intake unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string(), Some(30))
            }
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_seconds) = retry_after {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
