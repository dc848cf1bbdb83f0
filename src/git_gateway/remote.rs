//! Remote operations for GitGateway.

use anyhow::{bail, Result};

use crate::program_name::program_name;

use super::GitGateway;

/// How a local branch relates to its remote counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDivergence {
    /// No remote ref exists
    NoRemote,
    /// Local and remote point at the same commit
    InSync,
    /// Local has commits the remote lacks
    LocalAhead,
    /// Remote has commits the local lacks
    LocalBehind,
    /// Both sides have commits the other lacks
    Diverged,
}

impl std::fmt::Display for RemoteDivergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteDivergence::NoRemote => write!(f, "no remote branch"),
            RemoteDivergence::InSync => write!(f, "in sync"),
            RemoteDivergence::LocalAhead => write!(f, "local ahead"),
            RemoteDivergence::LocalBehind => write!(f, "local behind"),
            RemoteDivergence::Diverged => write!(f, "diverged"),
        }
    }
}

impl GitGateway {
    /// Fetch from the configured remote (pruning deleted refs)
    pub fn fetch(&self) -> Result<()> {
        let remote = self.remote().to_string();
        self.run_git_success(&["fetch", "--prune", &remote])?;
        self.refresh()
    }

    /// SHA of the remote-tracking ref for a branch, if present
    pub fn remote_branch_sha(&self, branch: &str) -> Result<Option<String>> {
        let refname = format!("refs/remotes/{}/{}", self.remote(), branch);
        Ok(self.find_reference(&refname)?.map(|oid| oid.to_string()))
    }

    /// Classify how a local branch relates to its remote-tracking ref
    pub fn remote_divergence(&self, branch: &str) -> Result<RemoteDivergence> {
        let remote_sha = match self.remote_branch_sha(branch)? {
            Some(sha) => sha,
            None => return Ok(RemoteDivergence::NoRemote),
        };
        let local_sha = self.get_branch_sha(branch)?;

        if local_sha == remote_sha {
            return Ok(RemoteDivergence::InSync);
        }

        let remote_is_ancestor = self.is_ancestor(&remote_sha, &local_sha)?;
        let local_is_ancestor = self.is_ancestor(&local_sha, &remote_sha)?;

        Ok(match (remote_is_ancestor, local_is_ancestor) {
            (true, false) => RemoteDivergence::LocalAhead,
            (false, true) => RemoteDivergence::LocalBehind,
            _ => RemoteDivergence::Diverged,
        })
    }

    /// Push a branch, rewriting remote history only when the remote matches
    /// our last-seen state (or unconditionally with `force`).
    pub fn push_branch(&self, branch: &str, force: bool) -> Result<()> {
        let remote = self.remote().to_string();
        let force_arg = if force { "--force" } else { "--force-with-lease" };
        let output = self.run_git(&["push", "--quiet", &remote, branch, force_arg])?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);

            if stderr.contains("stale info") || stderr.contains("[rejected]") {
                bail!(
                    "Push of '{}' rejected: the remote branch moved since your last fetch.\n\
                     Someone else may have pushed to it. Run '{} sync' first, or\n\
                     push with --force if you are sure your local branch is correct.",
                    branch,
                    program_name()
                );
            }

            bail!("git push failed for '{}': {}", branch, stderr.trim());
        }

        Ok(())
    }

    /// Fast-forward the trunk branch to its remote counterpart.
    ///
    /// Trunk is never rebased, so a non-fast-forward state is an error the
    /// user has to resolve outside this tool.
    pub fn fast_forward_trunk(&self, trunk: &str) -> Result<()> {
        let remote_ref = format!("{}/{}", self.remote(), trunk);

        let current = self.get_current_branch_name().ok();
        if current.as_deref() == Some(trunk) {
            self.run_git_success(&["merge", "--ff-only", &remote_ref])?;
        } else {
            // Not checked out: move the ref directly, but only fast-forward
            let remote_sha = match self.remote_branch_sha(trunk)? {
                Some(sha) => sha,
                None => return Ok(()),
            };
            if !self.is_ancestor(trunk, &remote_sha)? {
                bail!(
                    "Trunk '{}' has local commits not on the remote; refusing to move it.",
                    trunk
                );
            }
            self.set_branch_sha(trunk, &remote_sha)?;
        }
        self.refresh()
    }
}
