//! Forge abstraction: the narrow contract strata needs from a PR provider.
//!
//! The engine treats the provider as a small capability set: look up a PR
//! by branch, create one, update its fields, merge it, and read CI check
//! status. The GitHub implementation drives the `gh` CLI; tests use
//! `MockForge`.
//!
//! Draft toggling is a distinct operation on GitHub (a GraphQL-level
//! mutation rather than an ordinary field update); the `PrUpdate::draft`
//! field abstracts that away.

pub mod ci_wait;
pub mod github;
pub mod mock;
pub mod types;

pub use ci_wait::{wait_for_checks, CiWaitConfig, CiWaitResult};
pub use github::GitHubForge;
pub use mock::MockForge;
pub use types::{CheckDetail, CheckState, ChecksStatus, MergeMethod, PrRecord, PrState, PrUpdate};

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};

use crate::git_gateway::GitGateway;

/// Bound on concurrent PR-info fetches. Each worker owns its own forge
/// handle, so requests never share state.
const PR_FETCH_CONCURRENCY: usize = 8;

/// The capability set strata requires from a git hosting provider.
pub trait Forge: Send + Sync {
    /// Verify the provider CLI is installed and authenticated
    fn check_auth(&self) -> Result<()>;

    /// The owner and repository name of the configured remote
    fn owner_repo(&self) -> Result<(String, String)>;

    /// Look up the PR whose head is `branch`, if one exists
    fn pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>>;

    /// Create a PR for `branch` against `base`
    fn create_pr(&self, branch: &str, base: &str, title: &str, body: &str, draft: bool) -> Result<PrRecord>;

    /// Update fields of an existing PR; `None` fields are left untouched
    fn update_pr(&self, number: u64, update: &PrUpdate) -> Result<()>;

    /// Merge a PR with the given method
    fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()>;

    /// Aggregate CI status for a branch's head commit
    fn checks_status(&self, branch: &str) -> Result<ChecksStatus>;
}

/// Build the forge for the repository's configured remote.
///
/// Only GitHub remotes are supported; anything else is an explicit error
/// rather than a silent no-op.
pub fn get_forge() -> Result<Box<dyn Forge>> {
    let gateway = GitGateway::new()?;
    let remote = gateway.remote().to_string();
    let url = gateway
        .run_git_stdout(&["remote", "get-url", &remote])
        .context(format!("Remote '{}' is not configured", remote))?;

    if url.contains("github.com") {
        return Ok(Box::new(GitHubForge::new()));
    }

    anyhow::bail!(
        "Remote '{}' ({}) is not a GitHub remote. Only GitHub is supported for PR operations.",
        remote,
        url
    )
}

/// Fetch PR info for many branches concurrently.
///
/// One bounded worker per branch, each with its own forge handle; results
/// are joined before returning, in input order. Branches whose lookup
/// fails come back as `None` (treated as "no PR").
pub async fn fetch_prs_parallel(branches: Vec<String>) -> Vec<(String, Option<PrRecord>)> {
    let results: Vec<(String, Option<PrRecord>)> = stream::iter(branches.into_iter().map(|branch| async move {
        let name = branch.clone();
        let pr = tokio::task::spawn_blocking(move || {
            let forge = get_forge().ok()?;
            forge.pr_for_branch(&branch).ok().flatten()
        })
        .await
        .ok()
        .flatten();
        (name, pr)
    }))
    .buffered(PR_FETCH_CONCURRENCY)
    .collect()
    .await;

    results
}
