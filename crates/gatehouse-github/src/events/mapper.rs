//! Webhook payload translation.
//!
//! One mapping function per webhook event type, each reading the payload
//! shape GitHub documents for that type. Most payloads embed the pull
//! request they concern; `status` and `check_run` only carry a commit sha
//! and `issue_comment` only an issue number, so those resolve their pull
//! request through [`ChangeLookup`] before an event can be built.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use github_app_sdk::client::pulls::PullRequest;

use crate::change::{ChangeNumber, PullRequestChange};
use crate::error::ConnectionError;
use crate::events::{
    CheckRunAction, CheckRunEvent, DequeueEvent, EventContext, PullRequestAction,
    PullRequestEvent, PullRequestTarget, PushEvent, ReviewEvent, TriggerEvent,
};

/// Change lookups for payloads that do not embed a pull request.
#[async_trait]
pub trait ChangeLookup: Send + Sync {
    /// Load the pull request with the given number, from cache or the API.
    async fn pull_by_number(
        &self,
        project: &str,
        number: ChangeNumber,
    ) -> Result<Arc<PullRequestChange>, ConnectionError>;

    /// Find the open pull request whose head (or merge) commit is `sha`.
    async fn pull_by_sha(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Option<Arc<PullRequestChange>>, ConnectionError>;
}

/// Translates one webhook delivery into at most one [`TriggerEvent`].
pub struct EventMapper {
    server_url: String,
    lookup: Arc<dyn ChangeLookup>,
}

impl EventMapper {
    pub fn new(server_url: impl Into<String>, lookup: Arc<dyn ChangeLookup>) -> Self {
        Self {
            server_url: server_url.into(),
            lookup,
        }
    }

    /// Map a payload of the given event type.
    ///
    /// `Ok(None)` means the delivery is not something we act on (unhandled
    /// type, uninteresting action, or a commit that belongs to no open pull
    /// request). Errors mean the payload could not be processed and are
    /// logged by the caller against the delivery id.
    pub async fn map(
        &self,
        event_type: &str,
        body: &Value,
        context: EventContext,
    ) -> Result<Option<TriggerEvent>, ConnectionError> {
        match event_type {
            "push" => self.map_push(body, context),
            "pull_request" => self.map_pull_request(body, context),
            "issue_comment" => self.map_issue_comment(body, context).await,
            "pull_request_review" => self.map_review(body, context),
            "status" => self.map_status(body, context).await,
            "check_run" => self.map_check_run(body, context).await,
            other => {
                debug!(event = other, "unhandled webhook event type");
                Ok(None)
            }
        }
    }

    fn map_push(
        &self,
        body: &Value,
        context: EventContext,
    ) -> Result<Option<TriggerEvent>, ConnectionError> {
        let payload = PushPayload::deserialize(body)?;

        let branch = payload
            .ref_name
            .strip_prefix("refs/heads/")
            .map(str::to_owned);

        // Union of every path touched by any commit in the push.
        let mut files = BTreeSet::new();
        for commit in payload.commits {
            files.extend(commit.added);
            files.extend(commit.removed);
            files.extend(commit.modified);
        }

        Ok(Some(TriggerEvent::Push(PushEvent {
            context,
            project: payload.repository.full_name,
            ref_name: payload.ref_name,
            old_sha: payload.before,
            new_sha: payload.after,
            branch,
            files: files.into_iter().collect(),
            sender: sender_login(payload.sender),
        })))
    }

    fn map_pull_request(
        &self,
        body: &Value,
        context: EventContext,
    ) -> Result<Option<TriggerEvent>, ConnectionError> {
        let payload = PullRequestPayload::deserialize(body)?;
        let (Some(action), Some(pull_request)) = (payload.action, payload.pull_request) else {
            return Ok(None);
        };
        let Some(target) = self.target_from_payload(&pull_request) else {
            return Ok(None);
        };

        let mut label = None;
        let action = match action.as_str() {
            "opened" => PullRequestAction::Opened,
            "synchronize" => PullRequestAction::Changed,
            "closed" => PullRequestAction::Closed,
            "reopened" => PullRequestAction::Reopened,
            "labeled" => {
                label = payload.label.map(|l| l.name);
                PullRequestAction::Labeled
            }
            "unlabeled" => {
                label = payload.label.map(|l| l.name);
                PullRequestAction::Unlabeled
            }
            "edited" => PullRequestAction::Edited,
            _ => return Ok(None),
        };

        Ok(Some(TriggerEvent::PullRequest(PullRequestEvent {
            context,
            target,
            action,
            sender: sender_login(payload.sender),
            label,
            comment: None,
            status: None,
        })))
    }

    async fn map_issue_comment(
        &self,
        body: &Value,
        context: EventContext,
    ) -> Result<Option<TriggerEvent>, ConnectionError> {
        let payload = IssueCommentPayload::deserialize(body)?;
        if payload.action.as_deref() != Some("created") {
            return Ok(None);
        }
        let (Some(issue), Some(repository)) = (payload.issue, payload.repository) else {
            return Ok(None);
        };
        // Comments on plain issues carry no `pull_request` stanza.
        if issue.pull_request.is_none() {
            return Ok(None);
        }

        let number = ChangeNumber::new(issue.number);
        let change = match self
            .lookup
            .pull_by_number(&repository.full_name, number)
            .await
        {
            Ok(change) => change,
            Err(ConnectionError::ChangeNotFound { .. }) => {
                debug!(
                    project = %repository.full_name,
                    %number,
                    "commented pull request not found"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        Ok(Some(TriggerEvent::PullRequest(PullRequestEvent {
            context,
            target: PullRequestTarget::from_change(&change),
            action: PullRequestAction::Comment,
            sender: sender_login(payload.sender),
            label: None,
            comment: payload.comment.and_then(|c| c.body),
            status: None,
        })))
    }

    fn map_review(
        &self,
        body: &Value,
        context: EventContext,
    ) -> Result<Option<TriggerEvent>, ConnectionError> {
        let payload = ReviewPayload::deserialize(body)?;
        let (Some(action), Some(pull_request), Some(review)) =
            (payload.action, payload.pull_request, payload.review)
        else {
            return Ok(None);
        };
        let Some(target) = self.target_from_payload(&pull_request) else {
            return Ok(None);
        };

        Ok(Some(TriggerEvent::PullRequestReview(ReviewEvent {
            context,
            target,
            action,
            state: review.state,
            sender: sender_login(payload.sender),
        })))
    }

    async fn map_status(
        &self,
        body: &Value,
        context: EventContext,
    ) -> Result<Option<TriggerEvent>, ConnectionError> {
        let payload = StatusPayload::deserialize(body)?;
        // Pending is what a pipeline's own start report sets.
        if payload.state.as_deref() == Some("pending") {
            return Ok(None);
        }
        // The status payload carries the repository name at the top level.
        let Some(project) = payload.name else {
            return Ok(None);
        };
        let Some(change) = self.lookup.pull_by_sha(&project, &payload.sha).await? else {
            return Ok(None);
        };

        let status = status_reference(
            payload.sender.as_ref().and_then(|s| s.login.as_deref()),
            payload.context.as_deref(),
            payload.state.as_deref(),
        );

        Ok(Some(TriggerEvent::PullRequest(PullRequestEvent {
            context,
            target: PullRequestTarget::from_change(&change),
            action: PullRequestAction::Status,
            sender: sender_login(payload.sender),
            label: None,
            comment: None,
            status: Some(status),
        })))
    }

    async fn map_check_run(
        &self,
        body: &Value,
        context: EventContext,
    ) -> Result<Option<TriggerEvent>, ConnectionError> {
        let payload = CheckRunPayload::deserialize(body)?;
        let Some(action) = payload.action else {
            return Ok(None);
        };
        // "requested" also fires on plain pushes, which the push event
        // already covers; reacting to it would double-trigger.
        if !matches!(
            action.as_str(),
            "rerequested" | "completed" | "requested_action"
        ) {
            return Ok(None);
        }
        let (Some(check_run), Some(repository)) = (payload.check_run, payload.repository) else {
            return Ok(None);
        };

        let project = repository.full_name;
        let Some(change) = self
            .lookup
            .pull_by_sha(&project, &check_run.head_sha)
            .await?
        else {
            debug!(
                sha = %check_run.head_sha,
                "no pull request found for sha, skipping check_run event"
            );
            return Ok(None);
        };

        if action == "requested_action" {
            let identifier = payload.requested_action.and_then(|ra| ra.identifier);
            if identifier.as_deref() != Some("abort") {
                return Ok(None);
            }
            let event = dequeue_from_check_run(context, project, &check_run)?;
            return Ok(Some(TriggerEvent::Dequeue(event)));
        }

        let action = if action == "rerequested" {
            CheckRunAction::Requested
        } else {
            CheckRunAction::Completed
        };

        Ok(Some(TriggerEvent::CheckRun(CheckRunEvent {
            context,
            target: PullRequestTarget::from_change(&change),
            action,
            check_run: check_run_reference(&check_run),
            sender: sender_login(payload.sender),
        })))
    }

    /// Pull request coordinates from an embedded `pull_request` object.
    ///
    /// Returns `None` when the base repository is gone, which leaves the
    /// payload with nothing to attribute the event to.
    fn target_from_payload(&self, pull_request: &PullRequest) -> Option<PullRequestTarget> {
        let project = pull_request.base.repo.as_ref()?.full_name.clone();
        let url = self.pull_url(&project, pull_request.number);
        Some(PullRequestTarget {
            project,
            number: ChangeNumber::new(pull_request.number),
            head_sha: pull_request.head.sha.clone(),
            branch: pull_request.base.branch_ref.clone(),
            ref_name: format!("refs/pull/{}/head", pull_request.number),
            title: pull_request.title.clone(),
            updated_at: pull_request.updated_at,
            url,
        })
    }

    fn pull_url(&self, project: &str, number: u64) -> String {
        format!("{}/{}/pull/{}", self.server_url, project, number)
    }
}

/// Dequeue coordinates travel in the check run's `external_id`, put there
/// when the run was created.
fn dequeue_from_check_run(
    context: EventContext,
    project: String,
    check_run: &CheckRunBlob,
) -> Result<DequeueEvent, ConnectionError> {
    let raw = check_run.external_id.as_deref().unwrap_or_default();
    let attrs: DequeueAttrs = serde_json::from_str(raw)?;
    let number = ChangeNumber::coerce(&attrs.change)?;
    Ok(DequeueEvent {
        context,
        project,
        tenant: attrs.tenant,
        pipeline: attrs.pipeline,
        change: format!("{},{}", number, check_run.head_sha),
    })
}

/// `login:context:state` with the state lowercased, matching how merge
/// requirement contexts render. An absent reporter reads as "Unknown".
fn status_reference(login: Option<&str>, context: Option<&str>, state: Option<&str>) -> String {
    format!(
        "{}:{}:{}",
        login.unwrap_or("Unknown"),
        context.unwrap_or_default(),
        state.map(str::to_lowercase).unwrap_or_default(),
    )
}

/// `app:name:conclusion` with the conclusion lowercased. Check runs carry
/// no creator, only the app that owns them.
fn check_run_reference(check_run: &CheckRunBlob) -> String {
    let slug = check_run
        .app
        .as_ref()
        .and_then(|app| app.slug.as_deref())
        .unwrap_or("Unknown");
    format!(
        "{}:{}:{}",
        slug,
        check_run.name.as_deref().unwrap_or_default(),
        check_run
            .conclusion
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default(),
    )
}

fn sender_login(sender: Option<Sender>) -> Option<String> {
    sender.and_then(|s| s.login)
}

#[derive(Debug, Deserialize)]
struct Sender {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct LabelRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    ref_name: String,
    before: String,
    after: String,
    #[serde(default)]
    commits: Vec<PushCommit>,
    repository: RepositoryRef,
    sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct PushCommit {
    #[serde(default)]
    added: Vec<String>,
    #[serde(default)]
    removed: Vec<String>,
    #[serde(default)]
    modified: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: Option<String>,
    pull_request: Option<PullRequest>,
    label: Option<LabelRef>,
    sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct IssueCommentPayload {
    action: Option<String>,
    issue: Option<IssueRef>,
    comment: Option<CommentRef>,
    repository: Option<RepositoryRef>,
    sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct IssueRef {
    number: u64,
    /// Present only when the issue is the shadow of a pull request.
    pull_request: Option<IgnoredAny>,
}

#[derive(Debug, Deserialize)]
struct CommentRef {
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewPayload {
    action: Option<String>,
    pull_request: Option<PullRequest>,
    review: Option<ReviewRef>,
    sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct ReviewRef {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusPayload {
    /// Repository full name, top level in this payload shape.
    name: Option<String>,
    sha: String,
    state: Option<String>,
    context: Option<String>,
    sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct CheckRunPayload {
    action: Option<String>,
    check_run: Option<CheckRunBlob>,
    requested_action: Option<RequestedAction>,
    repository: Option<RepositoryRef>,
    sender: Option<Sender>,
}

#[derive(Debug, Deserialize)]
struct CheckRunBlob {
    head_sha: String,
    name: Option<String>,
    app: Option<AppRef>,
    conclusion: Option<String>,
    external_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AppRef {
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestedAction {
    identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DequeueAttrs {
    tenant: String,
    pipeline: String,
    change: Value,
}

#[cfg(test)]
#[path = "mapper_tests.rs"]
mod tests;
