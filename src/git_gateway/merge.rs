//! Local merge operations for GitGateway.
//!
//! Only the consolidate merge strategy creates local merge commits; every
//! other path merges on the remote.

use anyhow::{bail, Result};

use super::GitGateway;

impl GitGateway {
    /// Merge `branch` into the current branch with a merge commit (--no-ff).
    ///
    /// A no-ff merge keeps each consolidated branch's history as its own
    /// parent line, which lets the remote auto-close the individual PRs.
    pub fn merge_no_ff(&self, branch: &str, message: &str) -> Result<()> {
        let output = self.run_git(&["merge", "--no-ff", "-m", message, branch])?;
        self.refresh()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.contains("CONFLICT") || self.merge_in_progress()? {
                bail!(
                    "Merge of '{}' stopped on conflicts. Resolve them or run 'git merge --abort'.",
                    branch
                );
            }
            bail!("git merge --no-ff failed: {}", stderr.trim());
        }
        Ok(())
    }

    /// Abort an in-progress merge
    pub fn merge_abort(&self) -> Result<()> {
        self.run_git_success(&["merge", "--abort"])?;
        self.refresh()
    }
}
