//! Stash operations for GitGateway, with a scope guard.
//!
//! Absorb stashes the entire working state before touching any branch; the
//! guard restores it on every exit path, including panics and early errors.

use anyhow::Result;
use colored::Colorize;

use super::GitGateway;

impl GitGateway {
    /// Stash all changes, including staged and untracked files.
    ///
    /// Returns false when there was nothing to stash.
    pub fn stash_push(&self, message: &str) -> Result<bool> {
        if !self.has_uncommitted_changes()? {
            return Ok(false);
        }
        self.run_git_success(&["stash", "push", "--include-untracked", "-m", message])?;
        Ok(true)
    }

    /// Pop the most recent stash entry
    pub fn stash_pop(&self) -> Result<()> {
        self.run_git_success(&["stash", "pop"])
    }
}

/// RAII guard that restores a pushed stash when dropped.
///
/// `disarm()` keeps the stash popped state when the caller has already
/// restored it manually.
pub struct StashGuard<'a> {
    gateway: &'a GitGateway,
    active: bool,
}

impl<'a> StashGuard<'a> {
    /// Stash the working state if dirty. The guard pops it on drop.
    pub fn push(gateway: &'a GitGateway, message: &str) -> Result<Self> {
        let active = gateway.stash_push(message)?;
        Ok(Self { gateway, active })
    }

    /// Whether anything was actually stashed
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Pop the stash now and disarm the guard
    pub fn restore(mut self) -> Result<()> {
        if self.active {
            self.active = false;
            self.gateway.stash_pop()?;
        }
        Ok(())
    }

    /// Keep the stash entry and disarm the guard. Used when the working
    /// copy is in a conflicted state the user must resolve first; popping
    /// over it would compound the conflict.
    pub fn disarm(&mut self) {
        self.active = false;
    }
}

impl Drop for StashGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.gateway.stash_pop() {
                eprintln!(
                    "{} Failed to restore stashed changes: {}\n  Recover them with: git stash pop",
                    "!".yellow(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    #[test]
    fn test_stash_push_on_clean_tree_is_noop() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let gateway = GitGateway::new()?;
        assert!(!gateway.stash_push("test")?);
        Ok(())
    }

    #[test]
    fn test_stash_guard_restores_on_drop() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        std::fs::write(dir.path().join("wip.txt"), "wip\n")?;

        let gateway = GitGateway::new()?;
        {
            let guard = StashGuard::push(&gateway, "guard test")?;
            assert!(guard.is_active());
            assert!(!dir.path().join("wip.txt").exists());
        }
        assert!(dir.path().join("wip.txt").exists());
        Ok(())
    }

    #[test]
    fn test_stash_guard_restore_consumes() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        std::fs::write(dir.path().join("wip.txt"), "wip\n")?;

        let gateway = GitGateway::new()?;
        let guard = StashGuard::push(&gateway, "guard test")?;
        guard.restore()?;
        assert!(dir.path().join("wip.txt").exists());
        Ok(())
    }
}
