//! Mergeability policy evaluation.
//!
//! Decides whether a pull request is eligible to merge from review and
//! branch-protection state alone. GitHub's own `mergeable` flag is never
//! consulted: it reads false while GitHub is still computing it, and
//! git-level conflicts are detected downstream anyway.

use std::collections::HashSet;

use github_app_sdk::MergeRequirements;
use tracing::debug;

use crate::change::PullRequestChange;

/// Copy freshly fetched merge requirements onto a change.
pub fn apply_requirements(change: &mut PullRequestChange, requirements: MergeRequirements) {
    change.contexts = requirements.contexts;
    change.draft = requirements.draft;
    change.review_decision = requirements.review_decision;
    change.required_contexts = requirements.required_contexts;
    change.branch_protected = requirements.branch_protected;
}

/// Required contexts that have not reported success.
///
/// Contexts in `allow_needs` are stripped first: those are the ones the
/// caller will report itself, so their absence must not block the gate.
/// No required contexts means nothing can be missing.
pub fn missing_required_contexts(
    change: &PullRequestChange,
    allow_needs: &HashSet<String>,
) -> HashSet<String> {
    if change.required_contexts.is_empty() {
        return HashSet::new();
    }

    let successful = change.successful_contexts();
    change
        .required_contexts
        .iter()
        .filter(|context| !allow_needs.contains(*context))
        .filter(|context| !successful.contains(*context))
        .cloned()
        .collect()
}

/// Whether a change is eligible to merge.
///
/// In order: a draft can never merge; missing required status checks block
/// the merge; a review decision, when the provider computed one, must be
/// "APPROVED".
pub fn can_merge(change: &PullRequestChange, allow_needs: &HashSet<String>) -> bool {
    if change.draft {
        debug!(change = %change, "change can not merge because it is a draft");
        return false;
    }

    let missing = missing_required_contexts(change, allow_needs);
    if !missing.is_empty() {
        debug!(
            change = %change,
            ?missing,
            "change can not merge because required status checks are missing"
        );
        return false;
    }

    if let Some(decision) = &change.review_decision {
        if decision != "APPROVED" {
            debug!(change = %change, decision = %decision, "change can not merge because it is not approved");
            return false;
        }
    }

    true
}

#[cfg(test)]
#[path = "mergeability_tests.rs"]
mod tests;
