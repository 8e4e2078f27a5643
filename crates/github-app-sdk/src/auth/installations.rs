//! Project-to-installation mapping and installation token management.
//!
//! A GitHub App is installed on one or more accounts, and each installation
//! covers a set of repositories. API calls on behalf of a repository must be
//! authenticated with a short-lived token minted for the covering
//! installation. The [`InstallationRegistry`] owns that bookkeeping: it walks
//! the App's installations to learn which repository belongs to which
//! installation, and exchanges App JWTs for installation tokens on demand.
//!
//! Registry traffic (token exchange, installation listing) goes through a
//! plain HTTP client rather than the cached API pipeline; token responses
//! must never be served from a cache.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::auth::cache::InstallationTokenCache;
use crate::auth::jwt::AppJwtSigner;
use crate::auth::{AppCredentials, InstallationId, InstallationToken};
use crate::client::next_page_url;
use crate::error::AuthError;

/// Accept header for GitHub App endpoints.
const APP_PREVIEW_ACCEPT: &str = "application/vnd.github.machine-man-preview+json";

/// Minutes subtracted from the provider expiry so tokens are refreshed
/// before GitHub actually rejects them.
const TOKEN_EXPIRY_MARGIN_MINUTES: i64 = 5;

/// User agent for registry traffic.
const REGISTRY_USER_AGENT: &str = "github-app-sdk/0.1.0";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct InstallationRecord {
    id: InstallationId,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RepositoriesPage {
    repositories: Vec<RepositoryRecord>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRecord {
    full_name: String,
}

// ============================================================================
// Registry
// ============================================================================

/// Maps `owner/repo` project names to installation IDs and caches the
/// short-lived installation tokens minted for them.
#[derive(Debug)]
pub struct InstallationRegistry {
    signer: AppJwtSigner,
    api_base_url: String,
    http: reqwest::Client,
    tokens: InstallationTokenCache,
    installation_map: RwLock<HashMap<String, InstallationId>>,
    prime_lock: Mutex<()>,
}

impl InstallationRegistry {
    /// Create a registry for the given App credentials against an API base
    /// URL such as `https://api.github.com` or `https://ghe.example.com/api/v3`.
    pub fn new(
        credentials: &AppCredentials,
        api_base_url: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let signer = AppJwtSigner::new(credentials)?;
        let http = reqwest::Client::builder()
            .user_agent(REGISTRY_USER_AGENT)
            .build()?;

        Ok(Self {
            signer,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            http,
            tokens: InstallationTokenCache::new(),
            installation_map: RwLock::new(HashMap::new()),
            prime_lock: Mutex::new(()),
        })
    }

    /// Installation ID currently mapped for a project, if any.
    pub async fn installation_for_project(&self, project: &str) -> Option<InstallationId> {
        self.installation_map.read().await.get(project).copied()
    }

    /// Record the installation a webhook payload reported for a project.
    ///
    /// Payloads carry the covering installation, which keeps the map current
    /// between walks. GitHub only reassigns installations when an App is
    /// reinstalled, so a changed ID is worth a warning.
    pub async fn record_project(&self, project: &str, installation_id: InstallationId) {
        let mut map = self.installation_map.write().await;
        if let Some(previous) = map.get(project) {
            if *previous != installation_id {
                warn!(
                    project,
                    previous = %previous,
                    new = %installation_id,
                    "unexpected installation id change for project"
                );
            }
        }
        map.insert(project.to_string(), installation_id);
    }

    /// Installation token for a project.
    ///
    /// On a map miss the installation map is refreshed once and the lookup
    /// retried. A project still unmapped after the refresh yields an empty
    /// token; callers fall back to anonymous access in that case.
    pub async fn token_for_project(&self, project: &str) -> Result<String, AuthError> {
        let installation_id = match self.installation_for_project(project).await {
            Some(id) => Some(id),
            None => {
                debug!(project, "project not in installation map, refreshing");
                self.prime().await?;
                self.installation_for_project(project).await
            }
        };

        let Some(installation_id) = installation_id else {
            error!(project, "no installation ID available for project");
            return Ok(String::new());
        };

        self.token_for_installation(installation_id).await
    }

    /// Installation token by ID, fetching a fresh one when the cached token
    /// has passed its pulled-forward expiry.
    pub async fn token_for_installation(
        &self,
        installation_id: InstallationId,
    ) -> Result<String, AuthError> {
        if let Some(token) = self.tokens.get(installation_id).await {
            return Ok(token.token().to_string());
        }

        let jwt = self.signer.mint()?;
        let token = self.fetch_token(&jwt, installation_id).await?;
        let value = token.token().to_string();
        self.tokens.insert(installation_id, token).await;
        Ok(value)
    }

    /// Rebuild the project-to-installation map by walking every installation
    /// of the App and listing the repositories each one covers.
    ///
    /// Only one walk runs at a time. Concurrent callers block until the
    /// in-flight walk completes and then use its result instead of starting
    /// their own.
    pub async fn prime(&self) -> Result<(), AuthError> {
        let _guard = match self.prime_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("already fetching installations, waiting for that to finish");
                let _wait = self.prime_lock.lock().await;
                debug!("finished waiting for installation fetch");
                return Ok(());
            }
        };

        let jwt = self.signer.mint()?;
        let installations = self.list_installations(&jwt).await?;

        let walks = installations
            .iter()
            .map(|installation| self.map_installation(&jwt, installation.id));
        let mapped = try_join_all(walks).await?;

        // Merge rather than replace so projects from a previous walk survive
        // a partial view of the installations.
        let mut map = self.installation_map.write().await;
        for (installation_id, project_names) in mapped {
            for project_name in project_names {
                map.insert(project_name, installation_id);
            }
        }

        Ok(())
    }

    /// Ensure a token exists for one installation, then list its repositories.
    async fn map_installation(
        &self,
        jwt: &str,
        installation_id: InstallationId,
    ) -> Result<(InstallationId, Vec<String>), AuthError> {
        let token = match self.tokens.get(installation_id).await {
            Some(token) => token.token().to_string(),
            None => {
                let token = self.fetch_token(jwt, installation_id).await?;
                let value = token.token().to_string();
                self.tokens.insert(installation_id, token).await;
                value
            }
        };

        let project_names = self
            .repositories_of_installation(installation_id, &token)
            .await?;
        Ok((installation_id, project_names))
    }

    /// Walk the paged `/app/installations` listing with App JWT auth.
    async fn list_installations(&self, jwt: &str) -> Result<Vec<InstallationRecord>, AuthError> {
        let mut url = format!("{}/app/installations", self.api_base_url);
        let mut installations = Vec::new();
        let mut page = 1;

        loop {
            debug!(page, "fetching installations for GitHub app");
            let response = self
                .http
                .get(&url)
                .header(AUTHORIZATION, format!("Bearer {jwt}"))
                .header(ACCEPT, APP_PREVIEW_ACCEPT)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(AuthError::ListingFailed {
                    url,
                    status: status.as_u16(),
                });
            }

            let next = next_page_url(response.headers());
            let batch: Vec<InstallationRecord> = response.json().await?;
            installations.extend(batch);

            match next {
                Some(next_url) => {
                    url = next_url;
                    page += 1;
                }
                None => break,
            }
        }

        Ok(installations)
    }

    /// Walk the paged repository listing of one installation using its token.
    async fn repositories_of_installation(
        &self,
        installation_id: InstallationId,
        token: &str,
    ) -> Result<Vec<String>, AuthError> {
        let mut url = format!("{}/installation/repositories?per_page=100", self.api_base_url);
        let mut project_names = Vec::new();

        loop {
            debug!(
                installation_id = %installation_id,
                "fetching repositories for installation"
            );
            let response = self
                .http
                .get(&url)
                .header(AUTHORIZATION, format!("token {token}"))
                .header(ACCEPT, APP_PREVIEW_ACCEPT)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(AuthError::ListingFailed {
                    url,
                    status: status.as_u16(),
                });
            }

            let next = next_page_url(response.headers());
            let page: RepositoriesPage = response.json().await?;
            project_names.extend(page.repositories.into_iter().map(|repo| repo.full_name));

            match next {
                Some(next_url) => url = next_url,
                None => break,
            }
        }

        Ok(project_names)
    }

    /// Exchange an App JWT for an installation access token.
    ///
    /// The stored expiry is pulled forward by [`TOKEN_EXPIRY_MARGIN_MINUTES`]
    /// relative to what GitHub reports.
    async fn fetch_token(
        &self,
        jwt: &str,
        installation_id: InstallationId,
    ) -> Result<InstallationToken, AuthError> {
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_base_url, installation_id
        );
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {jwt}"))
            .header(ACCEPT, APP_PREVIEW_ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_string());
            return Err(AuthError::TokenRefreshFailed {
                installation_id,
                status: status.as_u16(),
                message,
            });
        }

        let data: AccessTokenResponse = response.json().await?;
        Ok(InstallationToken::new(
            data.token,
            data.expires_at - Duration::minutes(TOKEN_EXPIRY_MARGIN_MINUTES),
        ))
    }
}

#[cfg(test)]
#[path = "installations_tests.rs"]
mod tests;
