//! Rebase operations for GitGateway.
//!
//! Rebases run through the git CLI: libgit2's in-memory rebase cannot leave
//! the working copy in the conflicted state users resolve with ordinary git
//! tooling.

use anyhow::{bail, Context, Result};

use super::GitGateway;

/// Outcome of a rebase invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Rebase completed
    Success,
    /// Rebase paused on unmerged paths; the working copy holds the conflict
    Conflicts,
}

impl RebaseOutcome {
    pub fn has_conflicts(&self) -> bool {
        matches!(self, RebaseOutcome::Conflicts)
    }
}

impl GitGateway {
    /// Rebase `branch`'s commits after `old_base` onto `new_base`.
    ///
    /// Command: git rebase --onto <new_base> <old_base> <branch>
    ///
    /// The explicit old base is what keeps batch restacks correct: after a
    /// parent has itself been rebased, the child's commit range must be cut
    /// at the parent's pre-rebase tip, not at the current merge base.
    pub fn rebase_onto_from(&self, branch: &str, new_base: &str, old_base: &str) -> Result<RebaseOutcome> {
        if self.has_staged_or_modified_changes()? {
            bail!(
                "Cannot rebase - you have uncommitted changes.\n\
                 Commit or stash your changes first:\n\
                 • git add -A && git commit -m \"WIP\"\n\
                 • git stash"
            );
        }

        let output = self.run_git(&["rebase", "--onto", new_base, old_base, branch])?;
        self.refresh()?;

        if output.status.success() {
            return Ok(RebaseOutcome::Success);
        }

        if self.rebase_in_progress()? {
            return Ok(RebaseOutcome::Conflicts);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git rebase --onto failed: {}", stderr.trim());
    }

    /// Continue a rebase after conflict resolution.
    ///
    /// GIT_EDITOR is suppressed and stdin detached so nothing blocks waiting
    /// for interactive input.
    pub fn rebase_continue(&self) -> Result<RebaseOutcome> {
        use std::process::{Command, Stdio};

        super::verbose_cmd(&["rebase", "--continue"]);
        let output = Command::new("git")
            .args(["rebase", "--continue"])
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .current_dir(&self.workdir)
            .output()
            .context("Failed to run git rebase --continue")?;
        self.refresh()?;

        if output.status.success() {
            Ok(RebaseOutcome::Success)
        } else if self.rebase_in_progress()? {
            Ok(RebaseOutcome::Conflicts)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git rebase --continue failed: {}", stderr.trim());
        }
    }

    /// Abort an in-progress rebase
    pub fn rebase_abort(&self) -> Result<()> {
        self.run_git_success(&["rebase", "--abort"])?;
        self.refresh()
    }

    /// Fold fixup commits on `branch` into their targets.
    ///
    /// Command: git rebase -i --autosquash <base> with the sequence editor
    /// suppressed, so the generated todo list runs unedited.
    pub fn rebase_autosquash(&self, branch: &str, base: &str) -> Result<RebaseOutcome> {
        use std::process::{Command, Stdio};

        self.checkout_branch(branch)?;

        super::verbose_cmd(&["rebase", "-i", "--autosquash", base]);
        let output = Command::new("git")
            .args(["rebase", "-i", "--autosquash", base])
            .env("GIT_SEQUENCE_EDITOR", "true")
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .current_dir(&self.workdir)
            .output()
            .context("Failed to run git rebase --autosquash")?;
        self.refresh()?;

        if output.status.success() {
            return Ok(RebaseOutcome::Success);
        }

        if self.rebase_in_progress()? {
            return Ok(RebaseOutcome::Conflicts);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git rebase --autosquash failed: {}", stderr.trim());
    }

    /// Check for an in-progress rebase via git's state directories
    pub fn rebase_in_progress(&self) -> Result<bool> {
        let rebase_merge = self.git_dir.join("rebase-merge");
        let rebase_apply = self.git_dir.join("rebase-apply");
        Ok(rebase_merge.exists() || rebase_apply.exists())
    }

    /// Check for an in-progress merge
    pub fn merge_in_progress(&self) -> Result<bool> {
        Ok(self.git_dir.join("MERGE_HEAD").exists())
    }
}
