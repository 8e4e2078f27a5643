//! Trigger event model.
//!
//! Webhook payloads are translated into a closed set of trigger events
//! before anything downstream sees them. Each event carries the delivery
//! id and receipt timestamp of the payload it came from so log lines and
//! scheduling decisions can always be traced back to one delivery.

pub mod mapper;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::change::{ChangeNumber, PullRequestChange};

/// Delivery metadata stamped onto every event produced from a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    /// The `X-GitHub-Delivery` header value, or a generated id when the
    /// header was absent.
    pub delivery_id: String,
    /// When the payload entered the intake queue.
    pub received_at: DateTime<Utc>,
}

impl EventContext {
    pub fn new(delivery_id: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            received_at,
        }
    }
}

/// Pull request coordinates shared by every pull-request-shaped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestTarget {
    pub project: String,
    pub number: ChangeNumber,
    /// Head commit sha, which doubles as the patchset identifier.
    pub head_sha: String,
    /// Base branch the pull request merges into.
    pub branch: String,
    /// The synthetic ref GitHub exposes for the head, `refs/pull/N/head`.
    pub ref_name: String,
    pub title: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub url: String,
}

impl PullRequestTarget {
    /// Build the target from a change snapshot, for events that had to
    /// resolve their pull request through the connection.
    pub fn from_change(change: &PullRequestChange) -> Self {
        Self {
            project: change.project.clone(),
            number: change.number,
            head_sha: change.head_sha.clone(),
            branch: change.branch.clone(),
            ref_name: change.ref_name.clone(),
            title: change.title.clone(),
            updated_at: change.updated_at,
            url: change.url.clone(),
        }
    }
}

/// What happened to a pull request, after webhook actions are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    Opened,
    /// New commits were pushed (the `synchronize` webhook action).
    Changed,
    Closed,
    Reopened,
    Labeled,
    Unlabeled,
    Edited,
    /// Someone commented on the pull request.
    Comment,
    /// A commit status on the head sha changed.
    Status,
}

impl fmt::Display for PullRequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PullRequestAction::Opened => "opened",
            PullRequestAction::Changed => "changed",
            PullRequestAction::Closed => "closed",
            PullRequestAction::Reopened => "reopened",
            PullRequestAction::Labeled => "labeled",
            PullRequestAction::Unlabeled => "unlabeled",
            PullRequestAction::Edited => "edited",
            PullRequestAction::Comment => "comment",
            PullRequestAction::Status => "status",
        };
        f.write_str(name)
    }
}

/// A pushed ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub context: EventContext,
    pub project: String,
    pub ref_name: String,
    pub old_sha: String,
    pub new_sha: String,
    /// Set only for `refs/heads/*` pushes.
    pub branch: Option<String>,
    /// File paths touched across all commits in the push, deduplicated.
    pub files: Vec<String>,
    pub sender: Option<String>,
}

/// A pull request lifecycle action, comment, or head-commit status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub context: EventContext,
    pub target: PullRequestTarget,
    pub action: PullRequestAction,
    pub sender: Option<String>,
    /// Label name, for `labeled` and `unlabeled` actions.
    pub label: Option<String>,
    /// Comment body, for `comment` actions.
    pub comment: Option<String>,
    /// `login:context:state`, for `status` actions.
    pub status: Option<String>,
}

/// A pull request review was submitted, edited, or dismissed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewEvent {
    pub context: EventContext,
    pub target: PullRequestTarget,
    /// The webhook action, passed through unchanged.
    pub action: String,
    /// Review verdict such as `approved` or `changes_requested`.
    pub state: Option<String>,
    pub sender: Option<String>,
}

/// What happened to a check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckRunAction {
    /// A re-run was requested (the `rerequested` webhook action).
    Requested,
    Completed,
}

impl fmt::Display for CheckRunAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckRunAction::Requested => f.write_str("requested"),
            CheckRunAction::Completed => f.write_str("completed"),
        }
    }
}

/// A check run was re-requested or finished on a pull request head.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRunEvent {
    pub context: EventContext,
    pub target: PullRequestTarget,
    pub action: CheckRunAction,
    /// `app:name:conclusion` identifying the check run.
    pub check_run: String,
    pub sender: Option<String>,
}

/// A control request to drop a change from a pipeline, produced when a
/// check run's "Abort" action is clicked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DequeueEvent {
    pub context: EventContext,
    pub project: String,
    pub tenant: String,
    pub pipeline: String,
    /// The change to dequeue, as `<number>,<head sha>`.
    pub change: String,
}

/// Everything the connector can emit from a webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push(PushEvent),
    PullRequest(PullRequestEvent),
    PullRequestReview(ReviewEvent),
    CheckRun(CheckRunEvent),
    Dequeue(DequeueEvent),
}

impl TriggerEvent {
    /// Stable name of the event kind, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            TriggerEvent::Push(_) => "push",
            TriggerEvent::PullRequest(_) => "pull_request",
            TriggerEvent::PullRequestReview(_) => "pull_request_review",
            TriggerEvent::CheckRun(_) => "check_run",
            TriggerEvent::Dequeue(_) => "dequeue",
        }
    }

    pub fn delivery_id(&self) -> &str {
        &self.context().delivery_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.context().received_at
    }

    pub fn context(&self) -> &EventContext {
        match self {
            TriggerEvent::Push(event) => &event.context,
            TriggerEvent::PullRequest(event) => &event.context,
            TriggerEvent::PullRequestReview(event) => &event.context,
            TriggerEvent::CheckRun(event) => &event.context,
            TriggerEvent::Dequeue(event) => &event.context,
        }
    }

    pub fn project(&self) -> &str {
        match self {
            TriggerEvent::Push(event) => &event.project,
            TriggerEvent::PullRequest(event) => &event.target.project,
            TriggerEvent::PullRequestReview(event) => &event.target.project,
            TriggerEvent::CheckRun(event) => &event.target.project,
            TriggerEvent::Dequeue(event) => &event.project,
        }
    }

    /// The pull request this event refers to, if it refers to one.
    ///
    /// Used after mapping to refresh the change cache under the
    /// per-installation request limit.
    pub fn pull_request_target(&self) -> Option<&PullRequestTarget> {
        match self {
            TriggerEvent::PullRequest(event) => Some(&event.target),
            TriggerEvent::PullRequestReview(event) => Some(&event.target),
            TriggerEvent::CheckRun(event) => Some(&event.target),
            TriggerEvent::Push(_) | TriggerEvent::Dequeue(_) => None,
        }
    }
}
