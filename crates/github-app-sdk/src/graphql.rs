//! Merge requirement lookup over the GraphQL API.
//!
//! Everything a merge decision needs (statuses, check runs, branch
//! protection, draft state, review decision) is fetched in a single
//! GraphQL round trip instead of four REST calls per evaluation.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::client::GitHubClient;
use crate::error::ApiError;

const CAN_MERGE_QUERY: &str = r#"
query canMergeData(
  $owner: String!
  $repo: String!
  $pull: Int!
  $head_sha: String!
) {
  repository(owner: $owner, name: $repo) {
    branchProtectionRules(first: 100) {
      nodes {
        pattern
        requiredStatusCheckContexts
        matchingRefs(first: 100) {
          nodes {
            name
          }
        }
      }
    }
    pullRequest(number: $pull) {
      isDraft
      reviewDecision
    }
    object(expression: $head_sha) {
      ... on Commit {
        checkSuites(first: 100) {
          nodes {
            app {
              slug
            }
            checkRuns(first: 100) {
              nodes {
                name
                conclusion
              }
            }
          }
        }
        status {
          contexts {
            state
            context
            creator {
              login
            }
          }
        }
      }
    }
  }
}
"#;

// ============================================================================
// Public Types
// ============================================================================

/// One reported result on a commit, from either the status API or the
/// checks API.
///
/// Statuses map as (creator login, context, state); check runs map as
/// (app slug, run name, conclusion). States are normalized to lowercase
/// because the GraphQL and REST APIs disagree on casing. A missing
/// reporter reads as "Unknown"; a missing state means the check has not
/// finished.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusContext {
    /// Who reported the result
    pub reporter: String,

    /// Context or check run name
    pub name: String,

    /// Lowercased state or conclusion; `None` for unfinished check runs
    pub state: Option<String>,
}

impl StatusContext {
    /// Whether this result counts toward required status checks.
    pub fn is_successful(&self) -> bool {
        self.state.as_deref() == Some("success")
    }
}

impl fmt::Display for StatusContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.reporter,
            self.name,
            self.state.as_deref().unwrap_or("")
        )
    }
}

/// Everything the merge decision needs, collected in one query.
#[derive(Debug, Clone, Default)]
pub struct MergeRequirements {
    /// Reported statuses and check runs on the head commit
    pub contexts: HashSet<StatusContext>,

    /// Whether the pull request is a draft
    pub draft: bool,

    /// "APPROVED", "REVIEW_REQUIRED", "CHANGES_REQUESTED", or `None` when
    /// the server does not support review decisions
    pub review_decision: Option<String>,

    /// Status contexts the matching branch protection rule requires
    pub required_contexts: HashSet<String>,

    /// Whether a branch protection rule matches the target branch
    pub branch_protected: bool,
}

impl MergeRequirements {
    /// Names of contexts that reported success.
    pub fn successful_context_names(&self) -> HashSet<String> {
        self.contexts
            .iter()
            .filter(|context| context.is_successful())
            .map(|context| context.name.clone())
            .collect()
    }
}

// ============================================================================
// Response Shape
// ============================================================================

#[derive(Debug, Deserialize)]
struct CanMergeData {
    repository: Option<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
struct RepositoryNode {
    #[serde(rename = "branchProtectionRules")]
    branch_protection_rules: Option<Nodes<ProtectionRuleNode>>,
    #[serde(rename = "pullRequest")]
    pull_request: Option<PullRequestNode>,
    object: Option<CommitNode>,
}

#[derive(Debug, Deserialize)]
struct Nodes<T> {
    nodes: Option<Vec<T>>,
}

impl<T> Nodes<T> {
    fn into_vec(self) -> Vec<T> {
        self.nodes.unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ProtectionRuleNode {
    #[serde(rename = "requiredStatusCheckContexts")]
    required_status_check_contexts: Option<Vec<String>>,
    #[serde(rename = "matchingRefs")]
    matching_refs: Option<Nodes<RefNode>>,
}

#[derive(Debug, Deserialize)]
struct RefNode {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestNode {
    #[serde(rename = "isDraft", default)]
    is_draft: bool,
    #[serde(rename = "reviewDecision")]
    review_decision: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommitNode {
    status: Option<StatusNode>,
    #[serde(rename = "checkSuites")]
    check_suites: Option<Nodes<CheckSuiteNode>>,
}

#[derive(Debug, Deserialize)]
struct StatusNode {
    contexts: Option<Vec<StatusContextNode>>,
}

#[derive(Debug, Deserialize)]
struct StatusContextNode {
    state: Option<String>,
    context: String,
    creator: Option<CreatorNode>,
}

#[derive(Debug, Deserialize)]
struct CreatorNode {
    login: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckSuiteNode {
    app: Option<AppNode>,
    #[serde(rename = "checkRuns")]
    check_runs: Option<Nodes<CheckRunNode>>,
}

#[derive(Debug, Deserialize)]
struct AppNode {
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckRunNode {
    name: String,
    conclusion: Option<String>,
}

// ============================================================================
// Extraction
// ============================================================================

fn lowercased(value: Option<String>) -> Option<String> {
    value.map(|v| v.to_lowercase())
}

fn extract(data: CanMergeData, branch: &str) -> MergeRequirements {
    let mut requirements = MergeRequirements::default();
    let Some(repository) = data.repository else {
        return requirements;
    };

    // The protection rule whose matching refs include the target branch
    // decides protection state and required contexts.
    let rules = repository
        .branch_protection_rules
        .map(Nodes::into_vec)
        .unwrap_or_default();
    for rule in rules {
        let matches_branch = rule
            .matching_refs
            .map(Nodes::into_vec)
            .unwrap_or_default()
            .iter()
            .any(|r| r.name == branch);
        if matches_branch {
            requirements.branch_protected = true;
            requirements.required_contexts = rule
                .required_status_check_contexts
                .unwrap_or_default()
                .into_iter()
                .collect();
            break;
        }
    }

    if let Some(pull_request) = repository.pull_request {
        requirements.draft = pull_request.is_draft;
        requirements.review_decision = pull_request.review_decision;
    }

    let Some(commit) = repository.object else {
        return requirements;
    };

    let statuses = commit
        .status
        .and_then(|status| status.contexts)
        .unwrap_or_default();
    for status in statuses {
        requirements.contexts.insert(StatusContext {
            reporter: status
                .creator
                .and_then(|creator| creator.login)
                .unwrap_or_else(|| "Unknown".to_string()),
            name: status.context,
            state: lowercased(status.state),
        });
    }

    let suites = commit.check_suites.map(Nodes::into_vec).unwrap_or_default();
    for suite in suites {
        let slug = suite
            .app
            .and_then(|app| app.slug)
            .unwrap_or_else(|| "Unknown".to_string());
        for check_run in suite.check_runs.map(Nodes::into_vec).unwrap_or_default() {
            requirements.contexts.insert(StatusContext {
                reporter: slug.clone(),
                name: check_run.name,
                state: lowercased(check_run.conclusion),
            });
        }
    }

    requirements
}

impl GitHubClient {
    /// Fetch the merge requirement bundle for a pull request.
    ///
    /// `branch` is the pull request's target branch and selects which
    /// branch protection rule applies.
    pub async fn merge_requirements(
        &self,
        project: &str,
        number: u64,
        branch: &str,
        head_sha: &str,
    ) -> Result<MergeRequirements, ApiError> {
        let (owner, repo) = project.split_once('/').ok_or_else(|| ApiError::GraphQl {
            message: format!("project {project} is not in owner/repo form"),
        })?;
        let variables = serde_json::json!({
            "owner": owner,
            "repo": repo,
            "pull": number,
            "head_sha": head_sha,
        });
        let data = self.graphql(CAN_MERGE_QUERY, variables).await?;
        let parsed: CanMergeData = serde_json::from_value(data)?;
        Ok(extract(parsed, branch))
    }
}

#[cfg(test)]
#[path = "graphql_tests.rs"]
mod tests;
