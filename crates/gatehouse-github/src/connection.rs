//! The connection facade.
//!
//! [`GitHubConnection`] ties the pieces together: configuration, the API
//! client factory, the change and sha caches, and the event pipeline. It
//! is the one type downstream consumers talk to, both for reading change
//! state and for reporting results back to GitHub.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use github_app_sdk::client::checks::{
    CheckRun, CheckRunAction, CheckRunAnnotation, CheckRunOutput, CreateCheckRunRequest,
    UpdateCheckRunRequest,
};
use github_app_sdk::client::pulls::{CreateReviewRequest, MergeRequest, PullRequest};
use github_app_sdk::client::repos::BranchProtection;
use github_app_sdk::client::statuses::{CommitStatus, CreateStatusRequest};
use github_app_sdk::{
    ApiError, ClientConfig, ClientFactory, GitHubClient, InstallationRegistry,
};

use crate::change::{
    compose_message, Change, ChangeNumber, ChangeReview, PullRequestChange, RefChange,
};
use crate::change_cache::{ChangeCache, ChangeKey};
use crate::config::ConnectionConfig;
use crate::error::ConnectionError;
use crate::events::mapper::{ChangeLookup, EventMapper};
use crate::events::{PullRequestTarget, TriggerEvent};
use crate::mergeability;
use crate::pipeline::{ChangeRefresher, EventPipeline, EventSink};
use crate::sha_pr_cache::ShaPrCache;
use crate::web;

/// Attempts made to fetch a pull request before giving up.
const PULL_FETCH_ATTEMPTS: usize = 5;

/// Pause between pull request fetch attempts.
const PULL_FETCH_DELAY: Duration = Duration::from_secs(1);

/// Pull requests reporting more changed files than this never get their
/// file list fetched; walking that many listing pages would stall event
/// processing.
const MAX_CHANGED_FILES: u64 = 999;

/// A line comment to attach to a check run as an annotation.
#[derive(Debug, Clone)]
pub struct FileComment {
    /// Comment text.
    pub message: String,

    /// Single annotated line; ignored when `range` is set.
    pub line: Option<u64>,

    /// Annotated line range.
    pub range: Option<CommentRange>,

    /// Severity: "info", "warning", or "error". Anything else, or no
    /// level at all, reports as a warning.
    pub level: Option<String>,
}

/// Line range of a [`FileComment`].
#[derive(Debug, Clone)]
pub struct CommentRange {
    pub start_line: u64,
    pub end_line: u64,
    /// Column bounds only apply when the range covers a single line.
    pub start_column: Option<u64>,
    pub end_column: Option<u64>,
}

/// Everything a check run report carries besides the run id.
#[derive(Debug, Clone)]
pub struct CheckRunReport {
    /// Full repository name (owner/repo).
    pub project: String,

    /// Pull request the report belongs to, for log lines.
    pub number: ChangeNumber,

    /// Commit the check run applies to.
    pub sha: String,

    /// Status for a running report, conclusion for a completed one.
    pub status: String,

    /// Whether this report ends the check run.
    pub completed: bool,

    /// Check run name.
    pub context: String,

    /// Link to the build results.
    pub details_url: Option<String>,

    /// Summary text shown on the check run.
    pub message: String,

    /// Line comments per file path, attached as annotations.
    pub file_comments: HashMap<String, Vec<FileComment>>,

    /// Opaque id stored on the check run; read back when its "Abort"
    /// action fires.
    pub external_id: Option<String>,
}

/// The GitHub connection.
///
/// One instance per configured GitHub (or GitHub Enterprise) endpoint,
/// shared behind an `Arc`. All change state lives in the owned caches;
/// the event pipeline feeds them through the [`ChangeRefresher`] impl.
pub struct GitHubConnection {
    config: ConnectionConfig,
    factory: ClientFactory,
    installations: Option<Arc<InstallationRegistry>>,
    changes: ChangeCache,
    sha_prs: ShaPrCache,
    pipeline: Mutex<Option<Arc<EventPipeline>>>,
}

impl GitHubConnection {
    /// Create a connection from validated configuration.
    ///
    /// App credentials, when configured, are loaded here so a bad key file
    /// fails at startup. No network traffic happens until the first
    /// operation.
    pub fn new(config: ConnectionConfig) -> Result<Arc<Self>, ConnectionError> {
        let client_config = ClientConfig::default()
            .with_api_base_url(config.api_base_url())
            .with_graphql_url(config.graphql_url())
            .with_verify_ssl(config.verify_ssl)
            .with_rate_limit_logging(config.rate_limit_logging);
        Self::build(config, client_config)
    }

    fn build(
        config: ConnectionConfig,
        client_config: ClientConfig,
    ) -> Result<Arc<Self>, ConnectionError> {
        let installations = match config.app_credentials()? {
            Some(credentials) => Some(Arc::new(InstallationRegistry::new(
                &credentials,
                client_config.api_base_url.clone(),
            )?)),
            None => None,
        };

        let mut builder = ClientFactory::builder().config(client_config);
        if let Some(registry) = &installations {
            builder = builder.installation_registry(Arc::clone(registry));
        }
        if let Some(token) = &config.api_token {
            builder = builder.api_token(token.clone());
        }
        let factory = builder.build()?;

        Ok(Arc::new(Self {
            config,
            factory,
            installations,
            changes: ChangeCache::new(),
            sha_prs: ShaPrCache::new(),
            pipeline: Mutex::new(None),
        }))
    }

    /// The configuration this connection was built from.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The installation registry, when App authentication is configured.
    pub fn installations(&self) -> Option<&Arc<InstallationRegistry>> {
        self.installations.as_ref()
    }

    fn client(&self, project: &str) -> GitHubClient {
        self.factory.client(Some(project), Uuid::new_v4().to_string())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Prime the installation map and start the event pipeline.
    ///
    /// The connection itself serves as the pipeline's change lookup and
    /// refresher, so every webhook delivery lands in the change cache
    /// before the sink sees its event.
    pub async fn start(
        self: &Arc<Self>,
        sink: Arc<dyn EventSink>,
    ) -> Result<(), ConnectionError> {
        if let Some(registry) = &self.installations {
            registry.prime().await?;
        }

        let mapper = EventMapper::new(
            self.config.server_url(),
            Arc::clone(self) as Arc<dyn ChangeLookup>,
        );
        let pipeline = EventPipeline::start(
            mapper,
            Arc::clone(self) as Arc<dyn ChangeRefresher>,
            self.installations.clone(),
            sink,
            self.config.max_threads_per_installation,
        );
        *self.pipeline.lock().await = Some(Arc::new(pipeline));
        info!(server = %self.config.server, "connection started");
        Ok(())
    }

    /// Router serving the webhook payload endpoint.
    ///
    /// Only available while the pipeline is running; deliveries accepted
    /// by the router are queued straight into it.
    pub async fn payload_router(&self) -> Result<Router, ConnectionError> {
        let pipeline = self
            .pipeline
            .lock()
            .await
            .clone()
            .ok_or(ConnectionError::Stopped)?;
        Ok(web::payload_router(web::PayloadState::new(
            pipeline,
            self.config.webhook_token.clone(),
        )))
    }

    /// Stop accepting webhook deliveries and wind the pipeline down.
    pub async fn stop(&self) {
        let pipeline = self.pipeline.lock().await.take();
        if let Some(pipeline) = pipeline {
            pipeline.stop().await;
        }
    }

    // ========================================================================
    // Changes
    // ========================================================================

    /// Resolve the change an event refers to.
    ///
    /// Push events build a fresh ref change; pull-request-shaped events
    /// read the pull request from the change cache, fetching on a miss.
    /// Dequeue events carry no change payload and resolve to `None`.
    pub async fn get_change(
        &self,
        event: &TriggerEvent,
    ) -> Result<Option<Change>, ConnectionError> {
        self.change_for_event(event, false).await
    }

    /// Like [`get_change`](Self::get_change), but forces pull request data
    /// to be refetched.
    pub async fn refresh_change(
        &self,
        event: &TriggerEvent,
    ) -> Result<Option<Change>, ConnectionError> {
        self.change_for_event(event, true).await
    }

    async fn change_for_event(
        &self,
        event: &TriggerEvent,
        refresh: bool,
    ) -> Result<Option<Change>, ConnectionError> {
        if let TriggerEvent::Push(push) = event {
            return Ok(Some(Change::Ref(RefChange::from_push(
                &self.config.server_url(),
                &push.project,
                &push.ref_name,
                &push.old_sha,
                &push.new_sha,
                push.files.clone(),
            ))));
        }

        let Some(target) = event.pull_request_target() else {
            return Ok(None);
        };
        let change = self
            .pull_change(&target.project, target.number, Some(&target.head_sha), refresh)
            .await?;
        Ok(Some(Change::PullRequest(change)))
    }

    /// Get a pull request change through the cache, fetching or refreshing
    /// as needed, and record its shas for later lookups.
    async fn pull_change(
        &self,
        project: &str,
        number: ChangeNumber,
        patchset: Option<&str>,
        refresh: bool,
    ) -> Result<Arc<PullRequestChange>, ConnectionError> {
        let key = ChangeKey::new(project, number, patchset);
        let change = self
            .changes
            .get(&key, refresh, || self.fetch_pull_change(&key))
            .await?;
        self.sha_prs.record(project, &change).await;
        Ok(change)
    }

    /// Fetch a pull request and assemble the full change snapshot.
    async fn fetch_pull_change(
        &self,
        key: &ChangeKey,
    ) -> Result<PullRequestChange, ConnectionError> {
        info!(change = %key, "updating change");
        let client = self.client(&key.project);

        let pull = self.fetch_pull(&client, key).await?;
        let files = self.fetch_files(&client, key, &pull).await?;
        let reviews = self.fetch_reviews(&client, key).await?;
        let requirements = client
            .merge_requirements(
                &key.project,
                key.number.as_u64(),
                &pull.base.branch_ref,
                &pull.head.sha,
            )
            .await?;

        let message = compose_message(&pull.title, pull.body.as_deref());
        let labels = pull.labels.into_iter().map(|label| label.name).collect();
        let mut change = PullRequestChange {
            project: key.project.clone(),
            number: key.number,
            patchset: key.patchset.clone(),
            head_sha: pull.head.sha,
            merge_commit_sha: pull.merge_commit_sha,
            ref_name: format!("refs/pull/{}/head", key.number),
            branch: pull.base.branch_ref,
            title: pull.title,
            message,
            owner: pull.user.login,
            open: pull.state == "open",
            is_merged: pull.merged,
            draft: pull.draft,
            labels,
            reviews,
            files,
            updated_at: pull.updated_at,
            contexts: HashSet::new(),
            required_contexts: HashSet::new(),
            branch_protected: false,
            review_decision: None,
            url: pull.html_url,
        };
        mergeability::apply_requirements(&mut change, requirements);
        Ok(change)
    }

    /// Fetch the pull request body, retrying transient failures.
    ///
    /// GitHub occasionally answers the pull request endpoint with an error
    /// right after an event about that very pull request, so a handful of
    /// paced attempts are made before the change is reported unavailable.
    async fn fetch_pull(
        &self,
        client: &GitHubClient,
        key: &ChangeKey,
    ) -> Result<PullRequest, ConnectionError> {
        for attempt in 1..=PULL_FETCH_ATTEMPTS {
            match client.pull_request(&key.project, key.number.as_u64()).await {
                Ok(pull) => {
                    debug!(change = %key, "got pull request");
                    return Ok(pull);
                }
                Err(e) => {
                    warn!(change = %key, attempt, error = %e, "failed to get pull request, retrying");
                }
            }
            if attempt < PULL_FETCH_ATTEMPTS {
                tokio::time::sleep(PULL_FETCH_DELAY).await;
            }
        }
        Err(ConnectionError::ChangeNotFound {
            project: key.project.clone(),
            number: key.number.as_u64(),
        })
    }

    /// Changed file names of a pull request, or `None` when the list must
    /// be resolved out-of-band.
    ///
    /// Three ways to end up with `None`: the pull request reports more
    /// files than worth listing, GitHub cannot produce the diff (it
    /// answers 5xx for very large ones), or the listing comes back shorter
    /// than the pull request's own `changed_files` count.
    async fn fetch_files(
        &self,
        client: &GitHubClient,
        key: &ChangeKey,
        pull: &PullRequest,
    ) -> Result<Option<Vec<String>>, ConnectionError> {
        if pull.changed_files > MAX_CHANGED_FILES {
            warn!(
                change = %key,
                changed_files = pull.changed_files,
                "pull request has too many files to list, files will be resolved out-of-band"
            );
            return Ok(None);
        }

        let files = match client
            .pull_request_files(&key.project, key.number.as_u64())
            .await
        {
            Ok(files) => files,
            Err(e) if is_server_error(&e) => {
                warn!(
                    change = %key,
                    error = %e,
                    "failed to list pull request files, files will be resolved out-of-band"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if (files.len() as u64) < pull.changed_files {
            warn!(
                change = %key,
                listed = files.len(),
                changed_files = pull.changed_files,
                "file listing is shorter than the pull request reports, files will be resolved out-of-band"
            );
            return Ok(None);
        }

        Ok(Some(files))
    }

    /// Fetch reviews and collapse them to one entry per reviewer.
    ///
    /// The newest review wins, with one exception: a comment submitted
    /// after a vote does not replace the vote, because GitHub keeps the
    /// vote standing in that case. Repository permissions are looked up
    /// once per reviewer and fetch at most "read"/"write"/"admin";
    /// non-collaborators still read, they were allowed to review.
    async fn fetch_reviews(
        &self,
        client: &GitHubClient,
        key: &ChangeKey,
    ) -> Result<HashMap<String, ChangeReview>, ConnectionError> {
        let raw = client
            .pull_request_reviews(&key.project, key.number.as_u64())
            .await?;
        debug!(change = %key, count = raw.len(), "got reviews for pull request");

        let mut permissions: HashMap<String, String> = HashMap::new();
        let mut reviews: HashMap<String, ChangeReview> = HashMap::new();

        for review in raw {
            let login = review.user.login;
            let permission = match permissions.get(login.as_str()) {
                Some(permission) => permission.clone(),
                None => {
                    let fetched = client.collaborator_permission(&key.project, &login).await?;
                    permissions.insert(login.clone(), fetched.clone());
                    fetched
                }
            };
            let permission = match permission.as_str() {
                "write" | "admin" => permission,
                _ => "read".to_string(),
            };

            let incoming = ChangeReview {
                login: login.clone(),
                kind: review.state.to_lowercase(),
                submitted_at: review.submitted_at,
                permission,
            };

            let replace = match reviews.get(&login) {
                None => true,
                Some(existing) => {
                    if incoming.submitted_at <= existing.submitted_at {
                        false
                    } else if incoming.kind == "commented"
                        && matches!(existing.kind.as_str(), "approved" | "changes_requested")
                    {
                        debug!(
                            change = %key,
                            login = %login,
                            "discarding comment review due to an existing vote"
                        );
                        false
                    } else {
                        true
                    }
                }
            };
            if replace {
                reviews.insert(login, incoming);
            }
        }

        Ok(reviews)
    }

    // ========================================================================
    // Merge gate
    // ========================================================================

    /// Whether a change is eligible to merge.
    ///
    /// With `allow_refresh` the merge requirements (draft state, review
    /// decision, branch protection, reported contexts) are refetched and
    /// folded into the cached snapshot first, so a gate decision never
    /// runs on stale data.
    pub async fn can_merge(
        &self,
        change: &PullRequestChange,
        allow_needs: &HashSet<String>,
        allow_refresh: bool,
    ) -> Result<bool, ConnectionError> {
        if !allow_refresh {
            return Ok(mergeability::can_merge(change, allow_needs));
        }

        let requirements = self
            .client(&change.project)
            .merge_requirements(
                &change.project,
                change.number.as_u64(),
                &change.branch,
                &change.head_sha,
            )
            .await?;

        let key = ChangeKey::new(&change.project, change.number, change.patchset.as_deref());
        let refreshed = self
            .changes
            .modify(&key, |cached| {
                mergeability::apply_requirements(cached, requirements.clone())
            })
            .await;

        match refreshed {
            Some(refreshed) => Ok(mergeability::can_merge(&refreshed, allow_needs)),
            None => {
                let mut updated = change.clone();
                mergeability::apply_requirements(&mut updated, requirements);
                Ok(mergeability::can_merge(&updated, allow_needs))
            }
        }
    }

    /// Find the open pull request whose head commit is `sha`.
    ///
    /// The sha cache answers most lookups. On a miss the provider's issue
    /// search is consulted, every hit is fetched, and only pull requests
    /// whose head actually is `sha` count, because search matches the sha
    /// anywhere in the pull request. More than one head match is an error
    /// either way.
    pub async fn get_pull_by_sha(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Option<Arc<PullRequestChange>>, ConnectionError> {
        let cached = self.sha_prs.lookup(project, sha).await;
        if cached.len() > 1 {
            return Err(ConnectionError::AmbiguousSha {
                sha: sha.to_string(),
            });
        }
        if let Some(number) = cached.into_iter().next() {
            let change = self
                .pull_change(project, ChangeNumber::new(number), Some(sha), false)
                .await?;
            return Ok(Some(change));
        }

        let query = format!("{sha} type:pr repo:{project}");
        let items = self.client(project).search_issues(&query).await?;
        debug!(project, sha, results = items.len(), "searched pull requests for commit");

        let mut found = None;
        for item in items {
            let change = self
                .pull_change(project, ChangeNumber::new(item.number), Some(sha), false)
                .await?;
            if change.head_sha == sha {
                if found.is_some() {
                    return Err(ConnectionError::AmbiguousSha {
                        sha: sha.to_string(),
                    });
                }
                found = Some(change);
            }
        }
        Ok(found)
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Set a status on a commit.
    pub async fn report_status(
        &self,
        project: &str,
        sha: &str,
        state: &str,
        url: Option<&str>,
        description: Option<&str>,
        context: &str,
    ) -> Result<(), ConnectionError> {
        let request = CreateStatusRequest {
            state: state.to_string(),
            target_url: url.map(str::to_string),
            description: description.map(str::to_string),
            context: context.to_string(),
        };
        self.client(project)
            .create_commit_status(project, sha, &request)
            .await?;
        Ok(())
    }

    /// Statuses reported on a commit.
    pub async fn get_statuses(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Vec<CommitStatus>, ConnectionError> {
        Ok(self.client(project).commit_statuses(project, sha).await?)
    }

    /// Check runs reported on a commit.
    ///
    /// The check run endpoints only answer App-authenticated callers, so
    /// without App credentials this reads as "no check runs" rather than
    /// an error.
    pub async fn get_checks(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Vec<CheckRun>, ConnectionError> {
        if !self.config.has_app_auth() {
            debug!(
                project,
                sha, "not authenticated as an app, unable to retrieve commit checks"
            );
            return Ok(Vec::new());
        }
        Ok(self.client(project).commit_check_runs(project, sha).await?)
    }

    /// Post a comment on a pull request.
    pub async fn comment(
        &self,
        project: &str,
        number: ChangeNumber,
        body: &str,
    ) -> Result<(), ConnectionError> {
        self.client(project)
            .create_comment(project, number.as_u64(), body)
            .await?;
        Ok(())
    }

    /// Merge a pull request.
    ///
    /// `sha`, when given, must still be the head or GitHub rejects the
    /// merge; `commit_message` overrides the generated one. On success the
    /// cached change is flagged merged immediately, so a racing refresh
    /// cannot briefly report it unmerged again.
    pub async fn merge_pull(
        &self,
        change: &PullRequestChange,
        method: &str,
        sha: Option<&str>,
        commit_message: Option<&str>,
    ) -> Result<(), ConnectionError> {
        let request = MergeRequest {
            merge_method: method.to_string(),
            sha: sha.map(str::to_string),
            commit_message: commit_message.map(str::to_string),
        };
        self.client(&change.project)
            .merge_pull_request(&change.project, change.number.as_u64(), &request)
            .await?;

        let key = ChangeKey::new(&change.project, change.number, change.patchset.as_deref());
        self.changes.mark_merged(&key).await;
        debug!(change = %change, "merged pull request");
        Ok(())
    }

    /// Add a label to a pull request.
    pub async fn add_label(
        &self,
        project: &str,
        number: ChangeNumber,
        label: &str,
    ) -> Result<(), ConnectionError> {
        self.client(project)
            .add_label(project, number.as_u64(), label)
            .await?;
        Ok(())
    }

    /// Remove a label from a pull request.
    pub async fn remove_label(
        &self,
        project: &str,
        number: ChangeNumber,
        label: &str,
    ) -> Result<(), ConnectionError> {
        self.client(project)
            .remove_label(project, number.as_u64(), label)
            .await?;
        Ok(())
    }

    /// Create a review on a pull request.
    ///
    /// `review` is the verdict in reporter spelling ("approve",
    /// "request-changes", "comment"); GitHub wants it upper-snake.
    pub async fn create_review(
        &self,
        project: &str,
        number: ChangeNumber,
        sha: &str,
        review: &str,
        body: Option<&str>,
    ) -> Result<(), ConnectionError> {
        let event = review.replace('-', "_").to_uppercase();
        let request = CreateReviewRequest {
            event,
            commit_id: Some(sha.to_string()),
            body: body.map(str::to_string),
        };
        self.client(project)
            .create_review(project, number.as_u64(), &request)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Repository state
    // ========================================================================

    /// Branch names of a project, optionally restricted to protected ones.
    pub async fn list_branches(
        &self,
        project: &str,
        exclude_unprotected: bool,
    ) -> Result<Vec<String>, ConnectionError> {
        Ok(self
            .client(project)
            .list_branches(project, exclude_unprotected)
            .await?)
    }

    /// Protection rule of a branch, or `None` when it has none.
    pub async fn branch_protection(
        &self,
        project: &str,
        branch: &str,
    ) -> Result<Option<BranchProtection>, ConnectionError> {
        Ok(self
            .client(project)
            .branch_protection(project, branch)
            .await?)
    }

    /// Repository permission of an account: "admin", "write", "read", or
    /// "none".
    pub async fn repo_permission(
        &self,
        project: &str,
        login: &str,
    ) -> Result<String, ConnectionError> {
        Ok(self
            .client(project)
            .collaborator_permission(project, login)
            .await?)
    }

    // ========================================================================
    // Check runs
    // ========================================================================

    /// Create a check run.
    ///
    /// A running report (`completed == false`) carries an "Abort" action
    /// whose `requested_action` webhook becomes a dequeue event; a
    /// completed report creates the run already finished, for results
    /// whose starting report never happened.
    pub async fn create_check_run(&self, report: &CheckRunReport) -> (Option<u64>, Vec<String>) {
        self.apply_check(report, None).await
    }

    /// Complete an existing check run.
    pub async fn update_check_run(
        &self,
        report: &CheckRunReport,
        check_run_id: u64,
    ) -> (Option<u64>, Vec<String>) {
        self.apply_check(report, Some(check_run_id)).await
    }

    /// Create or update a check run, collecting failures instead of
    /// raising them.
    ///
    /// Check run problems must not fail the surrounding result reporting,
    /// so every failure comes back as a message the caller can post
    /// elsewhere. Returns the check run id to use for the next report.
    async fn apply_check(
        &self,
        report: &CheckRunReport,
        check_run_id: Option<u64>,
    ) -> (Option<u64>, Vec<String>) {
        let mut errors = Vec::new();

        if !self.config.has_app_auth() {
            debug!(
                project = %report.project,
                context = %report.context,
                sha = %report.sha,
                "not authenticated as an app, unable to create or update check run"
            );
            errors.push(format!(
                "Unable to create or update check {}. Must be authenticated as app integration.",
                report.context
            ));
            return (None, errors);
        }

        let output = CheckRunOutput {
            title: "Summary".to_string(),
            summary: report.message.clone(),
            annotations: build_annotations(&report.file_comments),
        };
        let client = self.client(&report.project);

        let result = if report.completed {
            // The run itself carries no end time, so completion is stamped
            // with the time the report is made.
            let completed_at = Some(Utc::now());
            let conclusion = Some(report.status.clone());
            match check_run_id {
                Some(id) => {
                    debug!(
                        project = %report.project,
                        number = %report.number,
                        context = %report.context,
                        status = %report.status,
                        "updating existing check run"
                    );
                    client
                        .update_check_run(
                            &report.project,
                            id,
                            &UpdateCheckRunRequest {
                                conclusion,
                                completed_at,
                                output: Some(output),
                                details_url: report.details_url.clone(),
                                external_id: report.external_id.clone(),
                                actions: Vec::new(),
                            },
                        )
                        .await
                }
                None => {
                    debug!(
                        project = %report.project,
                        number = %report.number,
                        context = %report.context,
                        "no check run to complete, creating a finished one"
                    );
                    client
                        .create_check_run(
                            &report.project,
                            &CreateCheckRunRequest {
                                name: report.context.clone(),
                                head_sha: report.sha.clone(),
                                status: None,
                                conclusion,
                                completed_at,
                                output: Some(output),
                                details_url: report.details_url.clone(),
                                external_id: report.external_id.clone(),
                                actions: Vec::new(),
                            },
                        )
                        .await
                }
            }
        } else {
            // Running check runs get an abort button; the resulting
            // requested_action webhook dequeues the change.
            let actions = vec![CheckRunAction {
                label: "Abort".to_string(),
                description: "Abort this check run".to_string(),
                identifier: "abort".to_string(),
            }];
            client
                .create_check_run(
                    &report.project,
                    &CreateCheckRunRequest {
                        name: report.context.clone(),
                        head_sha: report.sha.clone(),
                        status: Some(report.status.clone()),
                        conclusion: None,
                        completed_at: None,
                        output: Some(output),
                        details_url: report.details_url.clone(),
                        external_id: report.external_id.clone(),
                        actions,
                    },
                )
                .await
        };

        match result {
            Ok(id) => (Some(id), errors),
            Err(e) => {
                let action = if check_run_id.is_some() { "update" } else { "create" };
                error!(
                    project = %report.project,
                    number = %report.number,
                    context = %report.context,
                    sha = %report.sha,
                    error = %e,
                    "failed to {} check run",
                    action
                );
                errors.push(format!(
                    "Failed to {} check run {}: {}",
                    action, report.context, e
                ));
                (check_run_id, errors)
            }
        }
    }
}

#[async_trait]
impl ChangeLookup for GitHubConnection {
    async fn pull_by_number(
        &self,
        project: &str,
        number: ChangeNumber,
    ) -> Result<Arc<PullRequestChange>, ConnectionError> {
        self.pull_change(project, number, None, false).await
    }

    async fn pull_by_sha(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Option<Arc<PullRequestChange>>, ConnectionError> {
        self.get_pull_by_sha(project, sha).await
    }
}

#[async_trait]
impl ChangeRefresher for GitHubConnection {
    async fn refresh(&self, target: &PullRequestTarget) -> Result<(), ConnectionError> {
        self.pull_change(&target.project, target.number, Some(&target.head_sha), true)
            .await?;
        Ok(())
    }
}

/// Map a comment severity onto the annotation levels GitHub accepts.
fn annotation_level(level: Option<&str>) -> &'static str {
    match level {
        Some("info") => "notice",
        Some("warning") => "warning",
        Some("error") => "failure",
        _ => "warning",
    }
}

/// Build check run annotations from per-file line comments.
///
/// Comments without any line information are dropped; GitHub rejects the
/// whole check run update over a single annotation missing its lines.
/// Column bounds are only forwarded when the range covers one line, the
/// API refuses them otherwise.
fn build_annotations(file_comments: &HashMap<String, Vec<FileComment>>) -> Vec<CheckRunAnnotation> {
    let mut annotations = Vec::new();
    for (path, comments) in file_comments {
        for comment in comments {
            let (start_line, end_line) = match (&comment.range, comment.line) {
                (Some(range), _) => (range.start_line, range.end_line),
                (None, Some(line)) => (line, line),
                (None, None) => continue,
            };
            let (start_column, end_column) = match &comment.range {
                Some(range) if start_line == end_line => {
                    (range.start_column, range.end_column)
                }
                _ => (None, None),
            };

            annotations.push(CheckRunAnnotation {
                path: path.clone(),
                annotation_level: annotation_level(comment.level.as_deref()).to_string(),
                message: comment.message.clone(),
                start_line,
                end_line,
                start_column,
                end_column,
            });
        }
    }
    annotations
}

/// Whether an API failure is the provider failing, as opposed to the
/// request being wrong.
fn is_server_error(error: &ApiError) -> bool {
    match error {
        ApiError::Http { status, .. } => *status >= 500,
        ApiError::Pagination { status, .. } => *status >= 500,
        _ => false,
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
