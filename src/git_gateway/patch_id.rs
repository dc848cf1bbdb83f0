//! Patch-id computation for GitGateway.
//!
//! A patch-id is git's content hash of a commit's diff, stable across
//! rebases and cherry-picks. Comparing the patch-ids of a branch's unique
//! commits against those reachable from a candidate base detects
//! squash-merged work without relying on commit SHAs.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::Write;
use std::process::{Command, Stdio};

use super::GitGateway;

impl GitGateway {
    /// Compute the patch-id of a single commit, or None for empty commits
    pub fn patch_id(&self, commit: &str) -> Result<Option<String>> {
        let range = format!("{}^!", commit);
        let diff = self.run_git(&["diff-tree", "-p", &range])?;
        if !diff.status.success() {
            let stderr = String::from_utf8_lossy(&diff.stderr);
            anyhow::bail!("git diff-tree failed: {}", stderr.trim());
        }
        if diff.stdout.is_empty() {
            return Ok(None);
        }

        let mut child = Command::new("git")
            .args(["patch-id", "--stable"])
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to run git patch-id")?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(&diff.stdout)?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git patch-id failed: {}", stderr.trim());
        }

        // Output format: "<patch-id> <commit-sha>\n"
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.split_whitespace().next().map(|s| s.to_string()))
    }

    /// Patch-ids of all commits in `range`, skipping empty commits
    pub fn patch_ids_in_range(&self, range: &str) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        for sha in self.rev_list(range)? {
            if let Some(id) = self.patch_id(&sha)? {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Whether every commit unique to `old_base..branch` already appears, by
    /// patch-id, among the commits of `base_range`.
    ///
    /// Returns false when the branch has no unique non-empty commits; a
    /// branch with nothing of its own is a fast-forward case, not a
    /// squashed-merge case.
    pub fn patches_subsumed_by(&self, branch_range: &str, base_range: &str) -> Result<bool> {
        let branch_ids = self.patch_ids_in_range(branch_range)?;
        if branch_ids.is_empty() {
            return Ok(false);
        }
        let base_ids = self.patch_ids_in_range(base_range)?;
        Ok(branch_ids.is_subset(&base_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    #[test]
    fn test_patch_id_stable_across_branches() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        // Same change committed on two branches gets the same patch-id
        commit_file(&repo, "a.txt", "same content\n", "change on main")?;
        let sha_main = repo.head()?.peel_to_commit()?.id().to_string();

        let base = repo.revparse_single("HEAD~1")?.peel_to_commit()?;
        repo.branch("other", &base, false)?;
        repo.set_head("refs/heads/other")?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        commit_file(&repo, "a.txt", "same content\n", "change on other")?;
        let sha_other = repo.head()?.peel_to_commit()?.id().to_string();

        let gateway = GitGateway::new()?;
        let id_main = gateway.patch_id(&sha_main)?.unwrap();
        let id_other = gateway.patch_id(&sha_other)?.unwrap();
        assert_eq!(id_main, id_other);
        Ok(())
    }

    #[test]
    fn test_different_changes_different_ids() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        commit_file(&repo, "a.txt", "one\n", "first")?;
        let first = repo.head()?.peel_to_commit()?.id().to_string();
        commit_file(&repo, "b.txt", "two\n", "second")?;
        let second = repo.head()?.peel_to_commit()?.id().to_string();

        let gateway = GitGateway::new()?;
        assert_ne!(gateway.patch_id(&first)?, gateway.patch_id(&second)?);
        Ok(())
    }

    #[test]
    fn test_patches_subsumed_by_detects_same_content() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let base = repo.head()?.peel_to_commit()?;
        let base_sha = base.id().to_string();
        repo.branch("feature", &base, false)?;
        repo.set_head("refs/heads/feature")?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        commit_file(&repo, "f.txt", "feature work\n", "feature commit")?;

        // Same change lands on main (as by a squash merge upstream)
        repo.set_head("refs/heads/main")?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        commit_file(&repo, "f.txt", "feature work\n", "squashed: feature")?;

        let gateway = GitGateway::new()?;
        let branch_range = format!("{}..feature", base_sha);
        let base_range = format!("{}..main", base_sha);
        assert!(gateway.patches_subsumed_by(&branch_range, &base_range)?);
        Ok(())
    }

    #[test]
    fn test_empty_branch_range_is_not_subsumed() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let head = repo.head()?.peel_to_commit()?.id().to_string();

        let gateway = GitGateway::new()?;
        let empty = format!("{}..{}", head, head);
        assert!(!gateway.patches_subsumed_by(&empty, "main")?);
        Ok(())
    }
}
