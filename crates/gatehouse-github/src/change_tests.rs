//! Tests for the change model.

use super::*;
use chrono::TimeZone;
use serde_json::json;

fn pull_change(project: &str, number: u64) -> PullRequestChange {
    PullRequestChange {
        project: project.to_string(),
        number: ChangeNumber::new(number),
        patchset: Some("abc123".to_string()),
        head_sha: "abc123".to_string(),
        merge_commit_sha: None,
        ref_name: format!("refs/pull/{number}/head"),
        branch: "main".to_string(),
        title: "Add widget support".to_string(),
        message: "Add widget support".to_string(),
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
    }
}

/// Webhook integers and manual-enqueue strings must coerce to the same key.
#[test]
fn test_change_number_coercion() {
    let from_int = ChangeNumber::coerce(&json!(42)).expect("integer");
    let from_string = ChangeNumber::coerce(&json!("42")).expect("numeric string");
    assert_eq!(from_int, from_string);
    assert_eq!(from_int.as_u64(), 42);

    assert!(ChangeNumber::coerce(&json!("not-a-number")).is_err());
    assert!(ChangeNumber::coerce(&json!(3.5)).is_err());
    assert!(ChangeNumber::coerce(&json!(-7)).is_err());
    assert!(ChangeNumber::coerce(&json!(null)).is_err());
    assert!(ChangeNumber::coerce(&json!({"number": 42})).is_err());
}

/// A stale refresh response must never unmerge a merged change.
#[test]
fn test_carry_over_keeps_merge_flag() {
    let mut prior = pull_change("acme/widgets", 7);
    prior.is_merged = true;

    let mut fresh = pull_change("acme/widgets", 7);
    fresh.is_merged = false;
    fresh.carry_over(&prior);
    assert!(fresh.is_merged);

    // The flag moves false -> true normally.
    let unmerged = pull_change("acme/widgets", 7);
    let mut fresh = pull_change("acme/widgets", 7);
    fresh.is_merged = true;
    fresh.carry_over(&unmerged);
    assert!(fresh.is_merged);
}

/// An existing update timestamp survives a refresh that produced none, but
/// a refresh that did produce one wins.
#[test]
fn test_carry_over_updated_at() {
    let stamp = chrono::Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).single();

    let mut prior = pull_change("acme/widgets", 7);
    prior.updated_at = stamp;
    let mut fresh = pull_change("acme/widgets", 7);
    fresh.carry_over(&prior);
    assert_eq!(fresh.updated_at, stamp);

    let newer = chrono::Utc.with_ymd_and_hms(2021, 3, 2, 10, 0, 0).single();
    let mut fresh = pull_change("acme/widgets", 7);
    fresh.updated_at = newer;
    fresh.carry_over(&prior);
    assert_eq!(fresh.updated_at, newer);
}

/// A resolved file list sticks to the cache entry; an unresolved or empty
/// one is replaced by whatever the refresh found.
#[test]
fn test_carry_over_files() {
    let mut prior = pull_change("acme/widgets", 7);
    prior.files = Some(vec!["src/lib.rs".to_string()]);
    let mut fresh = pull_change("acme/widgets", 7);
    fresh.files = Some(vec!["src/lib.rs".to_string(), "src/main.rs".to_string()]);
    fresh.carry_over(&prior);
    assert_eq!(fresh.files, Some(vec!["src/lib.rs".to_string()]));

    let mut empty_prior = pull_change("acme/widgets", 7);
    empty_prior.files = Some(vec![]);
    let mut fresh = pull_change("acme/widgets", 7);
    fresh.files = Some(vec!["src/main.rs".to_string()]);
    fresh.carry_over(&empty_prior);
    assert_eq!(fresh.files, Some(vec!["src/main.rs".to_string()]));

    let none_prior = pull_change("acme/widgets", 7);
    let mut fresh = pull_change("acme/widgets", 7);
    fresh.files = Some(vec!["src/main.rs".to_string()]);
    fresh.carry_over(&none_prior);
    assert_eq!(fresh.files, Some(vec!["src/main.rs".to_string()]));
}

/// Successful contexts are the names whose state is "success".
#[test]
fn test_successful_contexts() {
    let mut change = pull_change("acme/widgets", 7);
    change.contexts = [
        StatusContext {
            reporter: "jenkins".to_string(),
            name: "tenant/check".to_string(),
            state: Some("success".to_string()),
        },
        StatusContext {
            reporter: "jenkins".to_string(),
            name: "tenant/gate".to_string(),
            state: Some("pending".to_string()),
        },
        StatusContext {
            reporter: "ci-app".to_string(),
            name: "unit-tests".to_string(),
            state: None,
        },
    ]
    .into_iter()
    .collect();

    let successful = change.successful_contexts();
    assert_eq!(successful.len(), 1);
    assert!(successful.contains("tenant/check"));
}

/// Push refs classify into branch, tag, and bare ref, with matching URLs.
#[test]
fn test_ref_change_classification() {
    let change = RefChange::from_push(
        "https://github.com",
        "acme/widgets",
        "refs/heads/main",
        "0000000000000000000000000000000000000000",
        "abc123",
        vec!["README.md".to_string()],
    );
    assert_eq!(change.kind, RefKind::Branch);
    assert_eq!(change.name.as_deref(), Some("main"));
    assert_eq!(change.url, "https://github.com/acme/widgets/commit/abc123");

    let change = RefChange::from_push(
        "https://github.com",
        "acme/widgets",
        "refs/tags/v1.2.0",
        "abc123",
        "def456",
        vec![],
    );
    assert_eq!(change.kind, RefKind::Tag);
    assert_eq!(change.name.as_deref(), Some("v1.2.0"));
    assert_eq!(
        change.url,
        "https://github.com/acme/widgets/releases/tag/v1.2.0"
    );

    let change = RefChange::from_push(
        "https://github.com",
        "acme/widgets",
        "refs/notes/commits",
        "abc123",
        "def456",
        vec![],
    );
    assert_eq!(change.kind, RefKind::Ref);
    assert!(change.name.is_none());
    assert_eq!(change.url, "https://github.com/acme/widgets/commit/def456");
}

/// Title and body combine like a commit message; empty pieces collapse.
#[test]
fn test_compose_message() {
    assert_eq!(
        compose_message("Add widgets", Some("Because we need them.")),
        "Add widgets\n\nBecause we need them."
    );
    assert_eq!(compose_message("Add widgets", None), "Add widgets");
    assert_eq!(compose_message("Add widgets", Some("")), "Add widgets");
    assert_eq!(
        compose_message("", Some("Body only.")),
        "Body only."
    );
    assert_eq!(compose_message("", None), "");
}

/// The change enum exposes the shared fields of both variants.
#[test]
fn test_change_accessors() {
    let pull = Change::PullRequest(Arc::new(pull_change("acme/widgets", 7)));
    assert_eq!(pull.project(), "acme/widgets");
    assert_eq!(pull.ref_name(), "refs/pull/7/head");
    assert_eq!(pull.url(), "https://github.com/acme/widgets/pull/7");

    let pushed = Change::Ref(RefChange::from_push(
        "https://github.com",
        "acme/widgets",
        "refs/heads/main",
        "aaa",
        "bbb",
        vec![],
    ));
    assert_eq!(pushed.project(), "acme/widgets");
    assert_eq!(pushed.ref_name(), "refs/heads/main");
}
