//! Git operations gateway for strata.
//!
//! Single entry point for every git operation the tool performs. Low-level
//! ref/blob/branch primitives are delegated to a `GitBackend` (git2 for
//! files-format repositories, subprocess for reftable); higher-level
//! porcelain operations (rebase with an explicit old base, stash, diff
//! parsing, patch-id, worktrees, remote pushes) shell out to git directly.
//!
//! The gateway owns the working-directory value used for every spawned git
//! process. Only one mutating git operation may be in flight at a time;
//! that is enforced by the operation lock in `state.rs`, not here.

mod branch;
mod commit;
mod diff;
mod merge;
mod patch_id;
mod rebase;
pub mod refs;
mod remote;
mod stash;
mod status;


use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::Command;

#[cfg(not(test))]
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::git_backend::{self, GitBackend, RefFormat};

pub use self::diff::Hunk;
pub use self::rebase::RebaseOutcome;
pub use self::remote::RemoteDivergence;
pub use self::stash::StashGuard;
pub use self::status::ConflictedFile;

/// Default remote name when config cannot be loaded
const DEFAULT_REMOTE: &str = "origin";

/// Log a git command if verbose mode is enabled
pub(crate) fn verbose_cmd(args: &[&str]) {
    if ExecutionContext::is_verbose() {
        eprintln!("  {} git {}", "[cmd]".dimmed(), args.join(" "));
    }
}

/// Unified interface to git operations.
///
/// All git access in strata goes through this gateway. It detects the
/// repository's ref format and selects the matching backend, and it carries
/// the configured remote name for push/fetch operations.
pub struct GitGateway {
    /// Backend handling low-level ref/branch/blob operations
    backend: Box<dyn GitBackend>,
    /// Path to the .git directory
    pub(crate) git_dir: PathBuf,
    /// Path to the working directory
    pub(crate) workdir: PathBuf,
    /// The configured remote name (e.g. "origin")
    remote: String,
}

impl GitGateway {
    /// Create a gateway for the repository containing the current directory.
    ///
    /// In test mode, uses the thread-local test repository path set via
    /// `TestRepoContext`.
    pub fn new() -> Result<Self> {
        #[cfg(test)]
        {
            if let Some(path) = crate::test_context::test_repo_path() {
                return Self::from_path(&path);
            }

            // A test without TestRepoContext would operate on this source
            // repository itself. Refuse loudly.
            panic!(
                "GitGateway::new() called in test without TestRepoContext!\n\
                 Use TestRepoContext in your test:\n\
                 \n\
                 let dir = tempdir()?;\n\
                 let _repo = init_test_repo(dir.path())?;\n\
                 let _ctx = TestRepoContext::new(dir.path());"
            );
        }

        #[cfg(not(test))]
        {
            let cwd = std::env::current_dir().context("Failed to read current directory")?;
            let mut gateway = Self::from_path(&cwd)
                .context("Not a git repository. Run this command from within a git repository.")?;
            if let Ok(config) = Config::load() {
                gateway.remote = config.remote;
            }
            Ok(gateway)
        }
    }

    /// Create a gateway rooted at a specific path.
    ///
    /// Used by tests and by worktree execution, where a second gateway is
    /// scoped to the worktree directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let backend = git_backend::create_backend(path)?;
        let git_dir = backend.git_dir().to_path_buf();
        let workdir = backend.workdir().to_path_buf();

        Ok(Self {
            backend,
            git_dir,
            workdir,
            remote: DEFAULT_REMOTE.to_string(),
        })
    }

    /// The configured remote name
    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Path to the working directory
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Path to the .git directory
    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// The repository's ref format
    #[allow(dead_code)]
    pub fn ref_format(&self) -> RefFormat {
        self.backend.ref_format()
    }

    /// Re-read backend state after an external ref write.
    ///
    /// Writes through the git CLI (rebase, update-ref in a subprocess) must
    /// be visible to subsequent backend reads.
    pub fn refresh(&self) -> Result<()> {
        self.backend.refresh()
    }

    pub(crate) fn backend(&self) -> &dyn GitBackend {
        self.backend.as_ref()
    }

    /// Run a git command in this gateway's working directory
    pub(crate) fn run_git(&self, args: &[&str]) -> Result<std::process::Output> {
        verbose_cmd(args);
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .context(format!("Failed to run git {}", args.join(" ")))
    }

    /// Run a git command, failing on nonzero exit
    pub(crate) fn run_git_success(&self, args: &[&str]) -> Result<()> {
        let output = self.run_git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(())
    }

    /// Run a git command, returning trimmed stdout
    pub(crate) fn run_git_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.run_git(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
