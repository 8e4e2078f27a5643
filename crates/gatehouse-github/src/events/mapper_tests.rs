use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::TimeZone;
use serde_json::json;

use super::*;

fn delivery_context() -> EventContext {
    let received = chrono::Utc
        .with_ymd_and_hms(2021, 3, 14, 9, 26, 53)
        .single()
        .unwrap();
    EventContext::new("d3adbeef-0001", received)
}

fn stored_change(project: &str, number: u64, head_sha: &str) -> Arc<PullRequestChange> {
    Arc::new(PullRequestChange {
        project: project.to_string(),
        number: ChangeNumber::new(number),
        patchset: Some(head_sha.to_string()),
        head_sha: head_sha.to_string(),
        merge_commit_sha: None,
        ref_name: format!("refs/pull/{number}/head"),
        branch: "main".to_string(),
        title: "Teach the gate to sing".to_string(),
        message: "Teach the gate to sing".to_string(),
        owner: "octocat".to_string(),
        open: true,
        is_merged: false,
        draft: false,
        labels: vec![],
        reviews: HashMap::new(),
        files: None,
        updated_at: None,
        contexts: HashSet::new(),
        required_contexts: HashSet::new(),
        branch_protected: false,
        review_decision: None,
        url: format!("https://github.com/{project}/pull/{number}"),
    })
}

/// In-memory lookup indexed by number and head sha; misses behave like the
/// real connection (not-found error, `None` for shas).
#[derive(Default)]
struct StubLookup {
    by_number: HashMap<(String, u64), Arc<PullRequestChange>>,
    by_sha: HashMap<(String, String), Arc<PullRequestChange>>,
    ambiguous_shas: Vec<String>,
    calls: AtomicUsize,
}

impl StubLookup {
    fn with_change(change: Arc<PullRequestChange>) -> Self {
        let mut stub = Self::default();
        stub.by_number.insert(
            (change.project.clone(), change.number.as_u64()),
            Arc::clone(&change),
        );
        stub.by_sha
            .insert((change.project.clone(), change.head_sha.clone()), change);
        stub
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeLookup for StubLookup {
    async fn pull_by_number(
        &self,
        project: &str,
        number: ChangeNumber,
    ) -> Result<Arc<PullRequestChange>, ConnectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.by_number
            .get(&(project.to_string(), number.as_u64()))
            .cloned()
            .ok_or_else(|| ConnectionError::ChangeNotFound {
                project: project.to_string(),
                number: number.as_u64(),
            })
    }

    async fn pull_by_sha(
        &self,
        project: &str,
        sha: &str,
    ) -> Result<Option<Arc<PullRequestChange>>, ConnectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.ambiguous_shas.iter().any(|s| s == sha) {
            return Err(ConnectionError::AmbiguousSha {
                sha: sha.to_string(),
            });
        }
        Ok(self
            .by_sha
            .get(&(project.to_string(), sha.to_string()))
            .cloned())
    }
}

fn mapper_with(lookup: Arc<StubLookup>) -> EventMapper {
    EventMapper::new("https://github.com", lookup)
}

fn pull_request_payload(action: &str) -> serde_json::Value {
    json!({
        "action": action,
        "pull_request": {
            "number": 8,
            "title": "Teach the gate to sing",
            "body": "Adds a chime.",
            "state": "open",
            "user": {"login": "octocat"},
            "head": {
                "ref": "feature/chime",
                "sha": "badc0ffee",
                "repo": {"full_name": "acme/widgets"}
            },
            "base": {
                "ref": "main",
                "sha": "f005ba11",
                "repo": {"full_name": "acme/widgets"}
            },
            "merge_commit_sha": null,
            "updated_at": "2021-03-14T09:00:00Z",
            "html_url": "https://github.com/acme/widgets/pull/8"
        },
        "label": {"name": "gate"},
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "octocat"}
    })
}

fn check_run_payload(action: &str) -> serde_json::Value {
    json!({
        "action": action,
        "check_run": {
            "head_sha": "badc0ffee",
            "name": "gate check",
            "app": {"slug": "gatehouse"},
            "conclusion": "SUCCESS",
            "external_id": "{\"tenant\": \"acme\", \"pipeline\": \"gate\", \"change\": 9}"
        },
        "requested_action": null,
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "octocat"}
    })
}

#[tokio::test]
async fn test_pull_request_opened_maps_target_fields() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let event = mapper
        .map("pull_request", &pull_request_payload("opened"), delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::PullRequest(event) = event else {
        panic!("expected a pull_request event");
    };
    assert_eq!(event.action, PullRequestAction::Opened);
    assert_eq!(event.target.project, "acme/widgets");
    assert_eq!(event.target.number, ChangeNumber::new(8));
    assert_eq!(event.target.head_sha, "badc0ffee");
    assert_eq!(event.target.branch, "main");
    assert_eq!(event.target.ref_name, "refs/pull/8/head");
    assert_eq!(event.target.url, "https://github.com/acme/widgets/pull/8");
    assert_eq!(event.target.title, "Teach the gate to sing");
    assert!(event.target.updated_at.is_some());
    assert_eq!(event.sender.as_deref(), Some("octocat"));
    // The payload carries a label but only labeled/unlabeled actions use it.
    assert_eq!(event.label, None);
    assert_eq!(event.context.delivery_id, "d3adbeef-0001");
}

#[tokio::test]
async fn test_pull_request_synchronize_becomes_changed() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let event = mapper
        .map(
            "pull_request",
            &pull_request_payload("synchronize"),
            delivery_context(),
        )
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::PullRequest(event) = event else {
        panic!("expected a pull_request event");
    };
    assert_eq!(event.action, PullRequestAction::Changed);
}

#[tokio::test]
async fn test_pull_request_labeled_carries_label_name() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let event = mapper
        .map(
            "pull_request",
            &pull_request_payload("unlabeled"),
            delivery_context(),
        )
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::PullRequest(event) = event else {
        panic!("expected a pull_request event");
    };
    assert_eq!(event.action, PullRequestAction::Unlabeled);
    assert_eq!(event.label.as_deref(), Some("gate"));
}

#[tokio::test]
async fn test_pull_request_uninteresting_action_is_dropped() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let event = mapper
        .map(
            "pull_request",
            &pull_request_payload("assigned"),
            delivery_context(),
        )
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
}

#[tokio::test]
async fn test_push_unions_files_across_commits() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let payload = json!({
        "ref": "refs/heads/main",
        "before": "0ld5ha",
        "after": "n3w5ha",
        "commits": [
            {"added": ["src/lib.rs"], "modified": ["README.md"], "removed": []},
            {"added": [], "modified": ["src/lib.rs"], "removed": ["legacy.rs"]}
        ],
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "octocat"}
    });

    let event = mapper
        .map("push", &payload, delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::Push(event) = event else {
        panic!("expected a push event");
    };
    assert_eq!(event.project, "acme/widgets");
    assert_eq!(event.ref_name, "refs/heads/main");
    assert_eq!(event.old_sha, "0ld5ha");
    assert_eq!(event.new_sha, "n3w5ha");
    assert_eq!(event.branch.as_deref(), Some("main"));
    assert_eq!(event.files, vec!["README.md", "legacy.rs", "src/lib.rs"]);
}

#[tokio::test]
async fn test_push_to_tag_has_no_branch() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let payload = json!({
        "ref": "refs/tags/v1.0",
        "before": "0ld5ha",
        "after": "n3w5ha",
        "commits": [],
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "octocat"}
    });

    let event = mapper
        .map("push", &payload, delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::Push(event) = event else {
        panic!("expected a push event");
    };
    assert_eq!(event.branch, None);
}

#[tokio::test]
async fn test_issue_comment_resolves_pull_request() {
    let lookup = Arc::new(StubLookup::with_change(stored_change(
        "acme/widgets",
        9,
        "badc0ffee",
    )));
    let mapper = mapper_with(Arc::clone(&lookup));
    let payload = json!({
        "action": "created",
        "issue": {"number": 9, "pull_request": {"url": "https://api.github.com/..."}},
        "comment": {"body": "recheck"},
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "reviewer"}
    });

    let event = mapper
        .map("issue_comment", &payload, delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::PullRequest(event) = event else {
        panic!("expected a pull_request event");
    };
    assert_eq!(event.action, PullRequestAction::Comment);
    assert_eq!(event.comment.as_deref(), Some("recheck"));
    assert_eq!(event.target.number, ChangeNumber::new(9));
    assert_eq!(event.target.title, "Teach the gate to sing");
    assert_eq!(event.sender.as_deref(), Some("reviewer"));
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn test_issue_comment_on_plain_issue_is_dropped() {
    let lookup = Arc::new(StubLookup::default());
    let mapper = mapper_with(Arc::clone(&lookup));
    let payload = json!({
        "action": "created",
        "issue": {"number": 9},
        "comment": {"body": "recheck"},
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "reviewer"}
    });

    let event = mapper
        .map("issue_comment", &payload, delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn test_issue_comment_edit_is_dropped() {
    let lookup = Arc::new(StubLookup::default());
    let mapper = mapper_with(Arc::clone(&lookup));
    let payload = json!({
        "action": "edited",
        "issue": {"number": 9, "pull_request": {}},
        "comment": {"body": "recheck"},
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "reviewer"}
    });

    let event = mapper
        .map("issue_comment", &payload, delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
    assert_eq!(lookup.calls(), 0);
}

/// A comment on a pull request that has since vanished maps to nothing
/// rather than failing the delivery.
#[tokio::test]
async fn test_issue_comment_for_missing_pull_request_is_dropped() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let payload = json!({
        "action": "created",
        "issue": {"number": 404, "pull_request": {}},
        "comment": {"body": "recheck"},
        "repository": {"full_name": "acme/widgets"},
        "sender": {"login": "reviewer"}
    });

    let event = mapper
        .map("issue_comment", &payload, delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
}

#[tokio::test]
async fn test_review_submitted_carries_state() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let mut payload = pull_request_payload("submitted");
    payload["review"] = json!({"state": "approved"});

    let event = mapper
        .map("pull_request_review", &payload, delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::PullRequestReview(event) = event else {
        panic!("expected a review event");
    };
    assert_eq!(event.action, "submitted");
    assert_eq!(event.state.as_deref(), Some("approved"));
    assert_eq!(event.target.number, ChangeNumber::new(8));
}

#[tokio::test]
async fn test_review_without_review_object_is_dropped() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let event = mapper
        .map(
            "pull_request_review",
            &pull_request_payload("submitted"),
            delivery_context(),
        )
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
}

#[tokio::test]
async fn test_status_resolves_pull_request_by_sha() {
    let lookup = Arc::new(StubLookup::with_change(stored_change(
        "acme/widgets",
        8,
        "badc0ffee",
    )));
    let mapper = mapper_with(Arc::clone(&lookup));
    let payload = json!({
        "name": "acme/widgets",
        "sha": "badc0ffee",
        "state": "success",
        "context": "ci/lint",
        "sender": {"login": "hound"}
    });

    let event = mapper
        .map("status", &payload, delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::PullRequest(event) = event else {
        panic!("expected a pull_request event");
    };
    assert_eq!(event.action, PullRequestAction::Status);
    assert_eq!(event.status.as_deref(), Some("hound:ci/lint:success"));
    assert_eq!(event.target.number, ChangeNumber::new(8));
}

#[tokio::test]
async fn test_status_pending_is_dropped_before_lookup() {
    let lookup = Arc::new(StubLookup::default());
    let mapper = mapper_with(Arc::clone(&lookup));
    let payload = json!({
        "name": "acme/widgets",
        "sha": "badc0ffee",
        "state": "pending",
        "context": "ci/lint",
        "sender": {"login": "hound"}
    });

    let event = mapper
        .map("status", &payload, delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn test_status_for_unknown_sha_is_dropped() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let payload = json!({
        "name": "acme/widgets",
        "sha": "unseen00",
        "state": "failure",
        "context": "ci/lint",
        "sender": {"login": "hound"}
    });

    let event = mapper
        .map("status", &payload, delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
}

#[tokio::test]
async fn test_status_ambiguous_sha_propagates_error() {
    let lookup = StubLookup {
        ambiguous_shas: vec!["badc0ffee".to_string()],
        ..StubLookup::default()
    };
    let mapper = mapper_with(Arc::new(lookup));
    let payload = json!({
        "name": "acme/widgets",
        "sha": "badc0ffee",
        "state": "failure",
        "context": "ci/lint",
        "sender": {"login": "hound"}
    });

    let error = mapper
        .map("status", &payload, delivery_context())
        .await
        .expect_err("ambiguity surfaces");
    assert!(matches!(error, ConnectionError::AmbiguousSha { .. }));
}

#[test]
fn test_status_reference_normalizes() {
    assert_eq!(
        status_reference(None, Some("ci/lint"), Some("SUCCESS")),
        "Unknown:ci/lint:success"
    );
    assert_eq!(
        status_reference(Some("hound"), None, None),
        "hound::"
    );
}

#[tokio::test]
async fn test_check_run_rerequested_becomes_requested() {
    let lookup = Arc::new(StubLookup::with_change(stored_change(
        "acme/widgets",
        8,
        "badc0ffee",
    )));
    let mapper = mapper_with(Arc::clone(&lookup));

    let event = mapper
        .map("check_run", &check_run_payload("rerequested"), delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::CheckRun(event) = event else {
        panic!("expected a check_run event");
    };
    assert_eq!(event.action, CheckRunAction::Requested);
    assert_eq!(event.check_run, "gatehouse:gate check:success");
    assert_eq!(event.target.number, ChangeNumber::new(8));
}

#[tokio::test]
async fn test_check_run_created_action_is_dropped() {
    let lookup = Arc::new(StubLookup::default());
    let mapper = mapper_with(Arc::clone(&lookup));

    let event = mapper
        .map("check_run", &check_run_payload("created"), delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn test_check_run_for_unknown_sha_is_dropped() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let event = mapper
        .map("check_run", &check_run_payload("completed"), delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
}

#[tokio::test]
async fn test_check_run_abort_action_becomes_dequeue() {
    let lookup = Arc::new(StubLookup::with_change(stored_change(
        "acme/widgets",
        9,
        "badc0ffee",
    )));
    let mapper = mapper_with(Arc::clone(&lookup));
    let mut payload = check_run_payload("requested_action");
    payload["requested_action"] = json!({"identifier": "abort"});

    let event = mapper
        .map("check_run", &payload, delivery_context())
        .await
        .expect("mapping succeeds")
        .expect("event produced");

    let TriggerEvent::Dequeue(event) = event else {
        panic!("expected a dequeue event");
    };
    assert_eq!(event.project, "acme/widgets");
    assert_eq!(event.tenant, "acme");
    assert_eq!(event.pipeline, "gate");
    assert_eq!(event.change, "9,badc0ffee");
}

#[tokio::test]
async fn test_check_run_unknown_requested_action_is_dropped() {
    let lookup = Arc::new(StubLookup::with_change(stored_change(
        "acme/widgets",
        9,
        "badc0ffee",
    )));
    let mapper = mapper_with(Arc::clone(&lookup));
    let mut payload = check_run_payload("requested_action");
    payload["requested_action"] = json!({"identifier": "rerun-all"});

    let event = mapper
        .map("check_run", &payload, delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
}

#[tokio::test]
async fn test_check_run_bad_external_id_errors() {
    let lookup = Arc::new(StubLookup::with_change(stored_change(
        "acme/widgets",
        9,
        "badc0ffee",
    )));
    let mapper = mapper_with(Arc::clone(&lookup));
    let mut payload = check_run_payload("requested_action");
    payload["requested_action"] = json!({"identifier": "abort"});
    payload["check_run"]["external_id"] = json!("not json");

    let error = mapper
        .map("check_run", &payload, delivery_context())
        .await
        .expect_err("malformed external id surfaces");
    assert!(matches!(error, ConnectionError::Payload(_)));
}

#[test]
fn test_check_run_reference_handles_missing_app() {
    let blob = CheckRunBlob {
        head_sha: "badc0ffee".to_string(),
        name: Some("gate check".to_string()),
        app: None,
        conclusion: None,
        external_id: None,
    };
    assert_eq!(check_run_reference(&blob), "Unknown:gate check:");
}

#[tokio::test]
async fn test_unhandled_event_type_is_dropped() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let event = mapper
        .map("deployment_status", &json!({}), delivery_context())
        .await
        .expect("mapping succeeds");
    assert!(event.is_none());
}

#[tokio::test]
async fn test_malformed_payload_errors() {
    let mapper = mapper_with(Arc::new(StubLookup::default()));
    let error = mapper
        .map("push", &json!({"before": "a", "after": "b"}), delivery_context())
        .await
        .expect_err("missing ref surfaces");
    assert!(matches!(error, ConnectionError::Payload(_)));
}
