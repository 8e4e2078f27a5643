//! GitHub API client plumbing.
//!
//! The [`ClientFactory`] owns the shared HTTP state (connection pool, ETag
//! cache, rate limit and retry guards) and hands out lightweight
//! [`GitHubClient`] handles scoped to a project and a correlation id.
//! Every outbound request flows through the same pipeline: ETag
//! revalidation, debug logging, the rate limit guard, and the retry guard,
//! in that order.
//!
//! Authentication is resolved per request. A client scoped to a project on
//! a factory that carries an installation registry authenticates with that
//! project's installation token; otherwise a static API token is used when
//! configured, and anonymous access is the fallback.

mod cache;
pub mod checks;
pub mod issues;
mod pagination;
pub mod pulls;
mod rate_limit;
pub mod repos;
mod retry;
pub mod search;
pub mod statuses;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, IF_NONE_MATCH};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::InstallationRegistry;
use crate::error::ApiError;

use cache::EtagCache;

pub use pagination::{next_page_url, parse_link_header, Pagination};
pub use rate_limit::RateLimitGuard;
pub use retry::RetryGuard;

/// Default Accept header for REST calls.
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for GitHub API client behavior.
///
/// Controls timeouts, retry behavior, rate limit logging, and API endpoints.
///
/// # Examples
///
/// ```
/// use github_app_sdk::client::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::default()
///     .with_api_base_url("https://ghe.example.com/api/v3")
///     .with_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string for API requests (required by GitHub)
    pub user_agent: String,
    /// Request timeout duration
    pub timeout: Duration,
    /// Base URL for REST requests
    pub api_base_url: String,
    /// URL for GraphQL requests
    pub graphql_url: String,
    /// Whether to verify TLS certificates
    pub verify_ssl: bool,
    /// Whether to debug-log rate limit headers on every response
    pub rate_limit_logging: bool,
    /// Maximum number of retries for failed GET requests
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_retry_delay: Duration,
    /// Upper bound for the doubling retry delay
    pub max_retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "github-app-sdk/0.1.0".to_string(),
            timeout: Duration::from_secs(300),
            api_base_url: "https://api.github.com".to_string(),
            graphql_url: "https://api.github.com/graphql".to_string(),
            verify_ssl: true,
            rate_limit_logging: true,
            max_retries: 5,
            initial_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    /// Set the user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the REST API base URL.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the GraphQL endpoint URL.
    pub fn with_graphql_url(mut self, url: impl Into<String>) -> Self {
        self.graphql_url = url.into();
        self
    }

    /// Enable or disable TLS certificate verification.
    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    /// Enable or disable rate limit logging.
    pub fn with_rate_limit_logging(mut self, enabled: bool) -> Self {
        self.rate_limit_logging = enabled;
        self
    }

    /// Set the maximum number of GET retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial and maximum retry delays.
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_retry_delay = initial;
        self.max_retry_delay = max;
        self
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Shared state behind every client handed out by one factory.
struct ClientShared {
    http: reqwest::Client,
    config: ClientConfig,
    registry: Option<Arc<InstallationRegistry>>,
    api_token: Option<String>,
    etag_cache: EtagCache,
    rate_limit: RateLimitGuard,
    retry: RetryGuard,
}

impl std::fmt::Debug for ClientShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientShared")
            .field("config", &self.config)
            .field("app_auth", &self.registry.is_some())
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Factory for GitHub API clients sharing one connection pool and cache.
///
/// Cloning the factory is cheap; all clones share the same underlying
/// state.
///
/// # Examples
///
/// ```no_run
/// # use github_app_sdk::client::{ClientFactory, ClientConfig};
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = ClientFactory::builder()
///     .config(ClientConfig::default())
///     .api_token("ghp_example")
///     .build()?;
///
/// let client = factory.client(Some("acme/widgets"), "event-123");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientFactory {
    inner: Arc<ClientShared>,
}

impl ClientFactory {
    /// Create a new builder for constructing a factory.
    pub fn builder() -> ClientFactoryBuilder {
        ClientFactoryBuilder::new()
    }

    /// Create a client scoped to a project and a correlation id.
    ///
    /// Passing a project selects installation token authentication when the
    /// factory carries an installation registry. The correlation id is
    /// attached to every log line the client emits.
    pub fn client(&self, project: Option<&str>, correlation_id: impl Into<String>) -> GitHubClient {
        GitHubClient {
            inner: Arc::clone(&self.inner),
            project: project.map(str::to_string),
            correlation_id: correlation_id.into(),
        }
    }

    /// Get the factory configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The installation registry, when App authentication is configured.
    pub fn installation_registry(&self) -> Option<&Arc<InstallationRegistry>> {
        self.inner.registry.as_ref()
    }
}

/// Builder for constructing [`ClientFactory`] instances.
pub struct ClientFactoryBuilder {
    config: ClientConfig,
    registry: Option<Arc<InstallationRegistry>>,
    api_token: Option<String>,
}

impl ClientFactoryBuilder {
    fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            registry: None,
            api_token: None,
        }
    }

    /// Set the client configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Authenticate project-scoped clients through an installation registry.
    pub fn installation_registry(mut self, registry: Arc<InstallationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Authenticate with a static personal access token.
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Build the factory.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Transport` if the HTTP client cannot be created.
    pub fn build(self) -> Result<ClientFactory, ApiError> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.config.timeout)
            .user_agent(&self.config.user_agent);
        if !self.config.verify_ssl {
            warn!("SSL verification disabled for GitHub connection");
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build()?;

        Ok(ClientFactory {
            inner: Arc::new(ClientShared {
                http,
                rate_limit: RateLimitGuard::new(self.config.rate_limit_logging),
                retry: RetryGuard::new(
                    self.config.max_retries,
                    self.config.initial_retry_delay,
                    self.config.max_retry_delay,
                ),
                etag_cache: EtagCache::new(),
                config: self.config,
                registry: self.registry,
                api_token: self.api_token,
            }),
        })
    }
}

impl Default for ClientFactoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Client
// ============================================================================

/// A GitHub API client scoped to one project and one correlation id.
///
/// Handles are cheap to clone and share the factory's connection pool,
/// ETag cache, and guards.
#[derive(Clone)]
pub struct GitHubClient {
    inner: Arc<ClientShared>,
    project: Option<String>,
    correlation_id: String,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("project", &self.project)
            .field("correlation_id", &self.correlation_id)
            .finish()
    }
}

impl GitHubClient {
    /// The project this client is scoped to, if any.
    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    /// The correlation id attached to this client's log output.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The REST API base URL this client talks to.
    pub fn api_base_url(&self) -> &str {
        &self.inner.config.api_base_url
    }

    /// Perform a GET request against an API path.
    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.execute(Method::GET, self.url_for(path), None, None)
            .await
    }

    /// Perform a GET request with a non-default Accept header.
    ///
    /// Some endpoints are only reachable behind a preview media type.
    pub async fn get_with_accept(
        &self,
        path: &str,
        accept: &str,
    ) -> Result<ApiResponse, ApiError> {
        self.execute(Method::GET, self.url_for(path), None, Some(accept))
            .await
    }

    /// Perform a GET request against an absolute URL.
    ///
    /// Pagination walks use this to follow `Link` headers, which carry
    /// fully qualified URLs.
    pub async fn get_url(&self, url: &str) -> Result<ApiResponse, ApiError> {
        self.execute(Method::GET, url.to_string(), None, None).await
    }

    /// Perform a GET request against an absolute URL with a non-default
    /// Accept header, for pagination walks behind a preview media type.
    pub async fn get_url_with_accept(
        &self,
        url: &str,
        accept: &str,
    ) -> Result<ApiResponse, ApiError> {
        self.execute(Method::GET, url.to_string(), None, Some(accept))
            .await
    }

    /// Perform a POST request with a JSON body.
    pub async fn post(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<ApiResponse, ApiError> {
        let body = serde_json::to_value(body)?;
        self.execute(Method::POST, self.url_for(path), Some(body), None)
            .await
    }

    /// Perform a PUT request with a JSON body.
    pub async fn put(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<ApiResponse, ApiError> {
        let body = serde_json::to_value(body)?;
        self.execute(Method::PUT, self.url_for(path), Some(body), None)
            .await
    }

    /// Perform a PATCH request with a JSON body.
    pub async fn patch(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<ApiResponse, ApiError> {
        let body = serde_json::to_value(body)?;
        self.execute(Method::PATCH, self.url_for(path), Some(body), None)
            .await
    }

    /// Perform a DELETE request.
    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.execute(Method::DELETE, self.url_for(path), None, None)
            .await
    }

    /// Perform a request with full control over method, body, and Accept.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        accept: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        self.execute(method, self.url_for(path), body, accept).await
    }

    /// Run a GraphQL query and return its `data` payload.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::GraphQl` when the response carries an `errors`
    /// array, with the error messages joined into one string.
    pub async fn graphql(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, ApiError> {
        let payload = serde_json::json!({ "query": query, "variables": variables });
        let url = self.inner.config.graphql_url.clone();
        let response = self
            .execute(Method::POST, url, Some(payload), None)
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json()?;
        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                let message = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .collect::<Vec<_>>()
                    .join("; ");
                let message = if message.is_empty() {
                    errors
                        .iter()
                        .map(|e| e.to_string())
                        .collect::<Vec<_>>()
                        .join("; ")
                } else {
                    message
                };
                return Err(ApiError::GraphQl { message });
            }
        }
        Ok(body.get("data").cloned().unwrap_or(serde_json::Value::Null))
    }

    fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.inner.config.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Resolve the Authorization header for one request.
    ///
    /// An empty installation token means no installation covers the
    /// project; the request then proceeds anonymously rather than sending
    /// a bogus header.
    async fn auth_header(&self) -> Result<Option<String>, ApiError> {
        if let (Some(registry), Some(project)) = (&self.inner.registry, self.project.as_deref()) {
            let token = registry.token_for_project(project).await?;
            if token.is_empty() {
                return Ok(None);
            }
            return Ok(Some(format!("token {token}")));
        }
        Ok(self
            .inner
            .api_token
            .as_ref()
            .map(|token| format!("token {token}")))
    }

    #[tracing::instrument(
        level = "debug",
        skip(self, method, url, body, accept),
        fields(
            correlation_id = %self.correlation_id,
            project = self.project.as_deref().unwrap_or(""),
        )
    )]
    async fn execute(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
        accept: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let auth = self.auth_header().await?;
        let response = self
            .send_with_rate_limit(&method, &url, body.as_ref(), accept, auth.as_deref())
            .await?;
        self.inner
            .retry
            .handle(&method, response, || {
                self.send_with_rate_limit(&method, &url, body.as_ref(), accept, auth.as_deref())
            })
            .await
    }

    /// Send a request once and let the rate limit guard absorb 403s.
    ///
    /// Retried requests come back through here so their responses re-enter
    /// rate limit handling as well.
    async fn send_with_rate_limit(
        &self,
        method: &Method,
        url: &str,
        body: Option<&serde_json::Value>,
        accept: Option<&str>,
        auth: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let response = self.send_once(method, url, body, accept, auth).await?;
        self.inner
            .rate_limit
            .handle(url, response, || {
                self.send_once(method, url, body, accept, auth)
            })
            .await
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        body: Option<&serde_json::Value>,
        accept: Option<&str>,
        auth: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let is_get = *method == Method::GET;
        let cached = if is_get {
            self.inner.etag_cache.lookup(url).await
        } else {
            None
        };

        let mut request = self.inner.http.request(method.clone(), url);
        request = request.header(ACCEPT, accept.unwrap_or(GITHUB_ACCEPT));
        if let Some(auth) = auth {
            request = request.header(AUTHORIZATION, auth);
        }
        if let Some(entry) = &cached {
            request = request.header(IF_NONE_MATCH, entry.etag.clone());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = std::time::Instant::now();
        let raw = request.send().await?;
        let status = raw.status();
        let headers = raw.headers().clone();
        let body_bytes = raw.bytes().await?;
        debug!(
            result = status.as_u16(),
            size = body_bytes.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "{} {}",
            method,
            url
        );

        if status == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                return Ok(entry.response);
            }
        }

        let response = ApiResponse::new(status, headers, body_bytes);
        if is_get && status.is_success() {
            self.inner.etag_cache.store(url, &response).await;
        }
        Ok(response)
    }
}

// ============================================================================
// Response
// ============================================================================

/// A buffered API response.
///
/// The body is fully read before the response is handed around so the
/// guards can inspect it and the ETag cache can store it.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl ApiResponse {
    /// Assemble a response from its parts.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The raw response body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// A header value as a string, if present and readable.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(ApiError::from)
    }

    /// Convert a non-success response into an `ApiError::Http`.
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ApiError::http(self.status.as_u16(), self.error_message()))
        }
    }

    /// Best-effort human-readable message for an error response.
    ///
    /// GitHub error bodies carry a `message` field; when the body is not
    /// JSON the raw text is returned, truncated to keep log lines sane.
    pub fn error_message(&self) -> String {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(&self.body) {
            if let Some(message) = value.get("message").and_then(|m| m.as_str()) {
                return message.to_string();
            }
        }
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        if text.chars().count() > 200 {
            let truncated: String = text.chars().take(200).collect();
            format!("{truncated}...")
        } else {
            text.to_string()
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
