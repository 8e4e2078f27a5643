//! Error types for GitHub App SDK operations.
//!
//! This module defines all error types used throughout the SDK, with proper
//! classification for retry logic and comprehensive context for debugging.

use thiserror::Error;

use crate::auth::InstallationId;

/// Authentication-related errors with retry classification.
///
/// Covers App credential problems, JWT minting failures, and installation
/// token refresh failures. Each variant carries enough context to decide
/// whether a retry can help.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid GitHub App credentials (non-retryable).
    #[error("Invalid GitHub App credentials: {message}")]
    InvalidCredentials { message: String },

    /// Invalid private key format or data (non-retryable).
    #[error("Invalid private key: {message}")]
    InvalidPrivateKey { message: String },

    /// JWT generation failed (non-retryable).
    #[error("JWT generation failed: {message}")]
    JwtGenerationFailed { message: String },

    /// The access-token endpoint rejected the refresh request.
    #[error("Installation token refresh failed for {installation_id}: {status} - {message}")]
    TokenRefreshFailed {
        installation_id: InstallationId,
        status: u16,
        message: String,
    },

    /// A paged app-level listing returned an error status.
    #[error("Installation listing failed at {url}: {status}")]
    ListingFailed { url: String, status: u16 },

    /// Transport failure while talking to GitHub during an auth flow.
    #[error("Network error during authentication: {0}")]
    Network(#[from] reqwest::Error),
}

impl AuthError {
    /// Check if this error represents a transient condition that may succeed if retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::InvalidCredentials { .. } => false,
            Self::InvalidPrivateKey { .. } => false,
            Self::JwtGenerationFailed { .. } => false,
            Self::TokenRefreshFailed { status, .. } => *status >= 500 || *status == 429,
            Self::ListingFailed { status, .. } => *status >= 500 || *status == 429,
            Self::Network(_) => true,
        }
    }
}

/// Errors during GitHub API operations.
///
/// These represent failures when communicating with the GitHub API after the
/// response hooks (rate-limit and retry guards) have had their chance: an
/// error status that survived the guards, a transport failure, or a response
/// body the SDK could not decode.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP error response from GitHub API.
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// The requested resource was not found.
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// A pull-request merge was attempted but GitHub did not merge it.
    ///
    /// Carries the provider's own message when the response body had one.
    #[error("Pull request merge failed: {message}")]
    MergeFailed { message: String },

    /// Failed to parse a JSON response from GitHub API.
    #[error("JSON parsing error: {0}")]
    Decode(#[from] serde_json::Error),

    /// HTTP client error (network, TLS, etc.).
    #[error("HTTP client error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A paginated listing failed partway through the walk.
    #[error("Pagination failed at {url}: {status}")]
    Pagination { url: String, status: u16 },

    /// GraphQL response carried errors instead of data.
    #[error("GraphQL error: {message}")]
    GraphQl { message: String },

    /// Authentication failed while preparing the request.
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthError),
}

impl ApiError {
    /// Build an `Http` variant from a status code and a best-effort body message.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Check if this error represents a transient condition that may succeed if retried.
    ///
    /// Transient conditions include server errors (5xx), secondary rate
    /// limiting (429), and network/transport failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound { .. } => false,
            Self::MergeFailed { .. } => false,
            Self::Decode(_) => false,
            Self::Transport(_) => true,
            Self::Pagination { status, .. } => *status >= 500 || *status == 429,
            Self::GraphQl { .. } => false,
            Self::Authentication(e) => e.is_transient(),
        }
    }
}

/// Webhook signature validation errors.
///
/// Raised before any JSON parsing happens; a webhook carrying one of these
/// is rejected at the HTTP boundary.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The X-Hub-Signature header was absent.
    #[error("X-Hub-Signature header missing")]
    MissingSignature,

    /// The signature header was present but not `sha1=<hex>`.
    #[error("Malformed signature header: {message}")]
    MalformedSignature { message: String },

    /// The HMAC instance could not be created from the secret.
    #[error("Failed to create HMAC instance: {message}")]
    Hmac { message: String },

    /// The computed digest did not match the header.
    #[error("Request signature does not match calculated payload signature")]
    Mismatch,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
