//! Detached worktrees with guaranteed cleanup.
//!
//! The merge executor can run an entire plan inside a throwaway worktree
//! so the user's checkout is never disturbed. The guard removes the
//! worktree on drop; on conflict the executor calls `keep()` so the user
//! can resolve in place.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::git_gateway::GitGateway;

/// RAII guard for a detached worktree.
pub struct WorktreeGuard {
    /// Workdir of the repository that owns the worktree
    owner_workdir: PathBuf,
    path: PathBuf,
    keep: bool,
}

impl WorktreeGuard {
    /// Create a detached worktree at `start_ref` under .git/strata/worktrees/.
    pub fn create(gateway: &GitGateway, name: &str, start_ref: &str) -> Result<Self> {
        let path = gateway.git_dir().join("strata").join("worktrees").join(name);
        if path.exists() {
            anyhow::bail!(
                "Worktree path {:?} already exists. Remove it with 'git worktree remove {}'.",
                path,
                path.display()
            );
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        gateway
            .run_git_success(&["worktree", "add", "--detach", &path_str, start_ref])
            .context("Failed to create worktree")?;

        Ok(Self {
            owner_workdir: gateway.workdir().to_path_buf(),
            path,
            keep: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Preserve the worktree past the guard's lifetime (conflict left for
    /// the user to resolve there).
    pub fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for WorktreeGuard {
    fn drop(&mut self) {
        if self.keep {
            eprintln!(
                "{} Worktree preserved at {} — resolve there, then run 'git worktree remove' when done.",
                "!".yellow(),
                self.path.display()
            );
            return;
        }

        let path_str = self.path.to_string_lossy().to_string();
        let result = std::process::Command::new("git")
            .args(["worktree", "remove", "--force", &path_str])
            .current_dir(&self.owner_workdir)
            .output();

        if let Ok(output) = result {
            if !output.status.success() {
                eprintln!(
                    "{} Could not remove worktree at {}: {}",
                    "!".yellow(),
                    self.path.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                );
            }
        }
    }
}
