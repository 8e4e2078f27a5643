//! Connector configuration.
//!
//! Loaded from TOML files plus `GATEHOUSE`-prefixed environment overrides
//! (double-underscore separator, e.g. `GATEHOUSE__SERVER=ghe.example.com`).
//! Every field carries a default so an empty environment still deserializes;
//! `validate()` then rejects contradictory authentication settings.

use std::fmt;
use std::path::PathBuf;

use github_app_sdk::{AppCredentials, GitHubAppId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// GitHub connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// GitHub server hostname. `github.com` selects the public API
    /// endpoints; anything else is treated as a GitHub Enterprise host.
    #[serde(default = "default_server")]
    pub server: String,

    /// Verify TLS certificates when talking to the API host.
    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    /// GitHub App id. Set together with `app_key` for App authentication.
    #[serde(default)]
    pub app_id: Option<u64>,

    /// Path to the App's private key PEM file.
    #[serde(default)]
    pub app_key: Option<PathBuf>,

    /// Static personal access token. Mutually exclusive with App auth.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Shared secret for webhook signature validation.
    #[serde(default)]
    pub webhook_token: Option<String>,

    /// Log rate-limit headers for every API response.
    #[serde(default = "default_true")]
    pub rate_limit_logging: bool,

    /// Concurrent change refreshes allowed per installation.
    #[serde(default = "default_max_threads")]
    pub max_threads_per_installation: usize,
}

fn default_server() -> String {
    "github.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_threads() -> usize {
    1
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            verify_ssl: true,
            app_id: None,
            app_key: None,
            api_token: None,
            webhook_token: None,
            rate_limit_logging: true,
            max_threads_per_installation: 1,
        }
    }
}

// Tokens never appear in logs, even at debug level.
impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("server", &self.server)
            .field("verify_ssl", &self.verify_ssl)
            .field("app_id", &self.app_id)
            .field("app_key", &self.app_key)
            .field("api_token", &self.api_token.as_ref().map(|_| "<REDACTED>"))
            .field(
                "webhook_token",
                &self.webhook_token.as_ref().map(|_| "<REDACTED>"),
            )
            .field("rate_limit_logging", &self.rate_limit_logging)
            .field(
                "max_threads_per_installation",
                &self.max_threads_per_installation,
            )
            .finish()
    }
}

impl ConnectionConfig {
    /// Load configuration from the standard sources.
    ///
    /// Sources (applied in order, later sources override earlier ones):
    ///  1. `/etc/gatehouse/github.toml` (system-wide defaults)
    ///  2. `./config/github.toml` (deployment-local override)
    ///  3. `explicit_path`, when given; this file must exist
    ///  4. Environment variables prefixed `GATEHOUSE__`
    ///
    /// The merged result is validated before it is returned.
    pub fn load(explicit_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/gatehouse/github")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/github")
                    .required(false)
                    .format(config::FileFormat::Toml),
            );

        if let Some(path) = explicit_path {
            builder = builder.add_source(
                config::File::with_name(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        let merged = builder
            .add_source(config::Environment::with_prefix("GATEHOUSE").separator("__"))
            .build()?;

        let config: Self = merged.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the merged configuration.
    ///
    /// Running without any credentials is allowed but degraded (anonymous
    /// API access is heavily rate limited), so it warns rather than fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads_per_installation < 1 {
            return Err(ConfigError::Invalid {
                message: "max_threads_per_installation must be at least 1".to_string(),
            });
        }

        if self.app_id.is_some() != self.app_key.is_some() {
            return Err(ConfigError::Invalid {
                message: "app_id and app_key must be configured together".to_string(),
            });
        }

        if self.has_app_auth() && self.api_token.is_some() {
            return Err(ConfigError::Invalid {
                message: "app_id/app_key and api_token are mutually exclusive".to_string(),
            });
        }

        if !self.has_app_auth() && self.api_token.is_none() {
            warn!(
                server = %self.server,
                "no authentication configured; API access will be anonymous and heavily rate limited"
            );
        }

        Ok(())
    }

    /// Whether App authentication is configured.
    pub fn has_app_auth(&self) -> bool {
        self.app_id.is_some() && self.app_key.is_some()
    }

    /// Load the App credentials named by the configuration.
    ///
    /// Returns `None` when App authentication is not configured. The key
    /// file is read and parsed eagerly so a bad path fails at startup
    /// rather than on the first API call.
    pub fn app_credentials(&self) -> Result<Option<AppCredentials>, ConfigError> {
        let (app_id, app_key) = match (self.app_id, self.app_key.as_deref()) {
            (Some(id), Some(path)) => (id, path),
            _ => return Ok(None),
        };

        let credentials = AppCredentials::from_key_file(GitHubAppId::new(app_id), app_key)
            .map_err(|e| ConfigError::KeyFile {
                path: app_key.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(Some(credentials))
    }

    /// Base URL for REST API calls.
    pub fn api_base_url(&self) -> String {
        if self.server == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.server)
        }
    }

    /// URL for GraphQL API calls.
    pub fn graphql_url(&self) -> String {
        if self.server == "github.com" {
            "https://api.github.com/graphql".to_string()
        } else {
            format!("https://{}/api/graphql", self.server)
        }
    }

    /// Browser-facing base URL, used to build change URLs.
    pub fn server_url(&self) -> String {
        format!("https://{}", self.server)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
