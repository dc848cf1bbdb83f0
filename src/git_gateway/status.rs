//! Working-tree status for GitGateway.

use anyhow::Result;

use super::GitGateway;

/// A file in conflicted state after a rebase or merge stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictedFile {
    pub path: String,
}

impl GitGateway {
    /// Whether the working tree is clean enough to start a rebase:
    /// no staged or modified tracked files (untracked files are fine).
    pub fn require_clean_for_rebase(&self) -> Result<()> {
        if self.has_staged_or_modified_changes()? {
            anyhow::bail!(
                "You have uncommitted changes.\n\
                 Commit or stash them before running this command."
            );
        }
        Ok(())
    }

    /// List files with unmerged entries (status --porcelain "UU", "AA", …)
    pub fn conflicted_files(&self) -> Result<Vec<ConflictedFile>> {
        let stdout = self.run_git_stdout(&["status", "--porcelain"])?;

        let mut files = Vec::new();
        for line in stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            let code = &line[..2];
            // Unmerged states per git-status(1)
            let unmerged = matches!(code, "DD" | "AU" | "UD" | "UA" | "DU" | "AA" | "UU");
            if unmerged {
                files.push(ConflictedFile {
                    path: line[3..].to_string(),
                });
            }
        }

        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    #[test]
    fn test_clean_repo_passes_rebase_check() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let gateway = GitGateway::new()?;
        gateway.require_clean_for_rebase()?;
        Ok(())
    }

    #[test]
    fn test_untracked_files_do_not_block_rebase() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        std::fs::write(dir.path().join("scratch.txt"), "x\n")?;

        let gateway = GitGateway::new()?;
        gateway.require_clean_for_rebase()?;
        Ok(())
    }

    #[test]
    fn test_no_conflicts_in_clean_repo() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let gateway = GitGateway::new()?;
        assert!(gateway.conflicted_files()?.is_empty());
        Ok(())
    }
}
