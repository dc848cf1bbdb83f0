//! Commit and staging operations for GitGateway.

use anyhow::Result;

use super::GitGateway;

impl GitGateway {
    /// Stage all changes (git add -A)
    pub fn stage_all(&self) -> Result<()> {
        self.backend().stage_all()
    }

    /// Create a commit from the index
    pub fn commit(&self, message: &str) -> Result<()> {
        self.backend().commit(message)
    }

    /// Amend the last commit, optionally replacing the message
    pub fn amend_commit(&self, message: Option<&str>) -> Result<()> {
        self.backend().amend_commit(message)
    }

    /// Create a fixup commit targeting `target_sha` from the index
    pub fn commit_fixup(&self, target_sha: &str) -> Result<()> {
        let arg = format!("--fixup={}", target_sha);
        self.run_git_success(&["commit", &arg])
    }

    /// Check for staged changes
    pub fn has_staged_changes(&self) -> Result<bool> {
        self.backend().has_staged_changes()
    }

    /// Check for any uncommitted changes, including untracked files
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        self.backend().has_uncommitted_changes()
    }

    /// Check for staged or modified tracked files (untracked excluded)
    pub fn has_staged_or_modified_changes(&self) -> Result<bool> {
        self.backend().has_staged_or_modified_changes()
    }

    /// List commit SHAs in `range` (e.g. "base..tip"), newest first
    pub fn rev_list(&self, range: &str) -> Result<Vec<String>> {
        let stdout = self.run_git_stdout(&["rev-list", range])?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Count commits in `range`
    pub fn rev_count(&self, range: &str) -> Result<usize> {
        let stdout = self.run_git_stdout(&["rev-list", "--count", range])?;
        Ok(stdout.parse().unwrap_or(0))
    }

    /// Apply a patch to the index only.
    ///
    /// `unidiff_zero` must be set when the patch was produced with -U0;
    /// git refuses zero-context patches otherwise.
    pub fn apply_cached(&self, patch: &str, unidiff_zero: bool) -> Result<()> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        let mut args = vec!["apply", "--cached"];
        if unidiff_zero {
            args.push("--unidiff-zero");
        }
        super::verbose_cmd(&args);

        let mut child = Command::new("git")
            .args(&args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        child
            .stdin
            .take()
            .expect("stdin was piped")
            .write_all(patch.as_bytes())?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git apply --cached failed: {}", stderr.trim());
        }
        Ok(())
    }
}
