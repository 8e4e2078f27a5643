//! # GitHub App SDK
//!
//! Client library for GitHub App integrations: App authentication with
//! JWT and installation tokens, a REST and GraphQL API client with rate
//! limit and retry handling, and webhook signature validation.
//!
//! This SDK provides:
//! - GitHub App authentication with per-installation token management
//! - An API client with transparent rate limit waits, retries, and ETag
//!   response caching
//! - Typed resource calls for pulls, issues, statuses, checks, branches,
//!   and search
//! - A single GraphQL query collecting everything a merge decision needs
//! - Webhook payload signature validation
//!
//! # Examples
//!
//! ## Building a client
//!
//! ```rust,no_run
//! use github_app_sdk::client::{ClientConfig, ClientFactory};
//!
//! # fn main() -> Result<(), github_app_sdk::ApiError> {
//! let factory = ClientFactory::builder()
//!     .config(ClientConfig::default())
//!     .api_token("ghp_example")
//!     .build()?;
//!
//! // A client scoped to one project and one correlation id.
//! let client = factory.client(Some("acme/widgets"), "event-1234");
//! # let _ = client;
//! # Ok(())
//! # }
//! ```
//!
//! ## Validating a webhook payload
//!
//! ```rust
//! use github_app_sdk::webhook;
//!
//! let secret = "webhook-secret";
//! let payload = br#"{"action": "opened"}"#;
//! let signature = webhook::sign_payload(secret, payload).unwrap();
//!
//! assert!(webhook::validate_signature(secret, payload, Some(&signature)).is_ok());
//! ```

// Public modules
pub mod auth;
pub mod client;
pub mod error;
pub mod graphql;
pub mod webhook;

// Re-export commonly used types at crate root for convenience
pub use error::{ApiError, AuthError, SignatureError};

pub use auth::{AppCredentials, GitHubAppId, InstallationId, InstallationRegistry, PrivateKey};
pub use client::{ApiResponse, ClientConfig, ClientFactory, GitHubClient};
pub use graphql::{MergeRequirements, StatusContext};
