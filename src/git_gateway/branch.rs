//! Branch operations for GitGateway.

use anyhow::{Context, Result};

use crate::git_backend::Oid;

use super::GitGateway;

impl GitGateway {
    /// Get the current branch name (fails on detached HEAD)
    pub fn get_current_branch_name(&self) -> Result<String> {
        self.backend().get_current_branch()
    }

    /// Check if HEAD points at a branch
    pub fn is_on_branch(&self) -> Result<bool> {
        self.backend().is_on_branch()
    }

    /// Check if a local branch exists
    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        self.backend().branch_exists(name)
    }

    /// Create a branch at a given ref without checking it out
    pub fn create_branch_at(&self, name: &str, at_ref: &str) -> Result<()> {
        self.backend().create_branch_at(name, at_ref)
    }

    /// Create a branch at HEAD and check it out, preserving staged changes
    pub fn create_and_checkout_branch(&self, name: &str) -> Result<()> {
        self.run_git_success(&["checkout", "-b", name])
    }

    /// Checkout an existing branch
    pub fn checkout_branch(&self, name: &str) -> Result<()> {
        self.backend()
            .checkout_branch(name)
            .context(format!("Failed to checkout '{}'", name))
    }

    /// Checkout a branch, discarding local modifications
    pub fn checkout_branch_force(&self, name: &str) -> Result<()> {
        self.run_git_success(&["checkout", "-f", name])?;
        self.refresh()
    }

    /// Delete a local branch (even if unmerged)
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.backend().delete_branch(name)
    }

    /// List all local branches
    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.backend().list_branches()
    }

    /// Get the SHA a branch points to
    pub fn get_branch_sha(&self, branch: &str) -> Result<String> {
        Ok(self.backend().get_ref_sha(branch)?.to_string())
    }

    /// Move a branch ref to a specific commit without touching the worktree.
    ///
    /// Used for fast-forward pointer moves and snapshot restoration. Callers
    /// ensure a clean tree before moving the checked-out branch.
    pub fn set_branch_sha(&self, branch: &str, sha: &str) -> Result<()> {
        let refname = format!("refs/heads/{}", branch);
        self.run_git_success(&["update-ref", &refname, sha])?;
        self.refresh()
    }

    /// Resolve an arbitrary rev (branch, SHA, rev expression) to an Oid
    pub fn resolve(&self, rev: &str) -> Result<Oid> {
        self.backend().get_ref_sha(rev)
    }

    /// Subject line of the commit a ref points to
    pub fn commit_subject(&self, reference: &str) -> Result<String> {
        self.backend().get_commit_subject(reference)
    }

    /// Merge base of two refs
    pub fn merge_base(&self, a: &str, b: &str) -> Result<String> {
        Ok(self.backend().get_merge_base(a, b)?.to_string())
    }

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.backend().is_ancestor(ancestor, descendant)
    }

    /// Whether `branch` is already based on `base`
    /// (merge-base(branch, base) equals the tip of base)
    pub fn is_branch_based_on(&self, branch: &str, base: &str) -> Result<bool> {
        self.backend().is_ancestor(base, branch)
    }
}
