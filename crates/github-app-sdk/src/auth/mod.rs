//! GitHub App authentication types.
//!
//! This module provides the core authentication building blocks:
//! - ID types (GitHubAppId, InstallationId)
//! - App credentials (app ID + RSA private key)
//! - Installation access tokens with expiry tracking
//! - JWT minting ([`jwt`]), the token cache ([`cache`]), and the
//!   project-to-installation registry ([`installations`])

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use zeroize::Zeroizing;

use crate::error::AuthError;

pub mod cache;
pub mod installations;
pub mod jwt;

#[cfg(test)]
pub(crate) mod test_keys;

pub use cache::InstallationTokenCache;
pub use installations::InstallationRegistry;
pub use jwt::AppJwtSigner;

// ============================================================================
// Core ID Types
// ============================================================================

/// GitHub App identifier assigned during app registration.
///
/// Globally unique identifier for a GitHub App, found in the app settings
/// page. Used as the `iss` claim when minting App JWTs.
///
/// # Examples
///
/// ```
/// use github_app_sdk::auth::GitHubAppId;
///
/// let app_id = GitHubAppId::new(123456);
/// assert_eq!(app_id.as_u64(), 123456);
/// assert_eq!(app_id.to_string(), "123456");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GitHubAppId(u64);

impl GitHubAppId {
    /// Create a new GitHub App ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for GitHubAppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GitHubAppId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self::new)
    }
}

/// GitHub App installation identifier for specific accounts.
///
/// When a GitHub App is installed on an organization or user account, GitHub
/// assigns an installation ID. This ID is used to obtain installation tokens
/// and perform operations on behalf of that installation.
///
/// # Examples
///
/// ```
/// use github_app_sdk::auth::InstallationId;
///
/// let installation = InstallationId::new(98765);
/// assert_eq!(installation.as_u64(), 98765);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstallationId(u64);

impl InstallationId {
    /// Create a new installation ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InstallationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InstallationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self::new)
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// RSA private key for App JWT signing.
///
/// Holds the PEM text, validated at construction. The key material is zeroed
/// on drop and never exposed in Debug output.
#[derive(Clone)]
pub struct PrivateKey {
    pem: Zeroizing<String>,
}

impl PrivateKey {
    /// Create a private key from a PEM-encoded string.
    ///
    /// Accepts both PKCS#1 (`BEGIN RSA PRIVATE KEY`, the format GitHub
    /// serves when generating App keys) and PKCS#8 (`BEGIN PRIVATE KEY`).
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidPrivateKey` if the PEM is empty, lacks
    /// BEGIN/END markers, or does not parse as an RSA private key.
    pub fn from_pem(pem: &str) -> Result<Self, AuthError> {
        use rsa::pkcs1::DecodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;

        let pem = pem.trim();

        if pem.is_empty() {
            return Err(AuthError::InvalidPrivateKey {
                message: "PEM string cannot be empty".to_string(),
            });
        }

        if !pem.contains("-----BEGIN") || !pem.contains("-----END") {
            return Err(AuthError::InvalidPrivateKey {
                message: "Invalid PEM format: missing BEGIN/END markers".to_string(),
            });
        }

        // Validate by attempting to parse; PKCS#1 first, then PKCS#8.
        if rsa::RsaPrivateKey::from_pkcs1_pem(pem).is_err() {
            rsa::RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| AuthError::InvalidPrivateKey {
                message: format!("Failed to parse RSA private key: {}", e),
            })?;
        }

        Ok(Self {
            pem: Zeroizing::new(pem.to_string()),
        })
    }

    /// Read and validate a private key from a PEM file.
    pub fn from_pem_file(path: &Path) -> Result<Self, AuthError> {
        let pem = std::fs::read_to_string(path).map_err(|e| AuthError::InvalidPrivateKey {
            message: format!("Failed to read key file {}: {}", path.display(), e),
        })?;
        Self::from_pem(&pem)
    }

    /// Get the PEM bytes for use with signing primitives.
    pub fn pem_bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("pem", &"<REDACTED>")
            .finish()
    }
}

/// GitHub App credentials: the app ID plus its signing key.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    app_id: GitHubAppId,
    private_key: PrivateKey,
}

impl AppCredentials {
    /// Create credentials from an already-validated key.
    pub fn new(app_id: GitHubAppId, private_key: PrivateKey) -> Self {
        Self {
            app_id,
            private_key,
        }
    }

    /// Create credentials by loading the key from a PEM file.
    pub fn from_key_file(app_id: GitHubAppId, path: &Path) -> Result<Self, AuthError> {
        Ok(Self {
            app_id,
            private_key: PrivateKey::from_pem_file(path)?,
        })
    }

    /// The GitHub App ID.
    pub fn app_id(&self) -> GitHubAppId {
        self.app_id
    }

    /// The RSA private key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }
}

// ============================================================================
// Installation Tokens
// ============================================================================

/// Installation-scoped access token for GitHub API operations.
///
/// GitHub issues these with a one-hour lifetime; the registry stores them
/// with the expiry pulled forward so a token is refreshed before it can go
/// stale mid-request. The token string is never exposed in Debug output.
///
/// # Examples
///
/// ```
/// use github_app_sdk::auth::InstallationToken;
/// use chrono::{Utc, Duration};
///
/// let token = InstallationToken::new("ghs_abc".to_string(), Utc::now() + Duration::hours(1));
/// assert!(!token.is_expired());
/// ```
#[derive(Clone)]
pub struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl InstallationToken {
    /// Create a new installation token.
    pub fn new(token: String, expires_at: DateTime<Utc>) -> Self {
        Self { token, expires_at }
    }

    /// Get the token string for use in API requests.
    ///
    /// Included in the Authorization header as `Authorization: token <token>`.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Get when this token expires.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Check if the token is currently expired.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Check if the token will expire within the margin period.
    pub fn expires_soon(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

// Security: don't expose token in debug output
impl std::fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationToken")
            .field("expires_at", &self.expires_at)
            .field("token", &"<REDACTED>")
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
