//! Operation lock and continuation state.
//!
//! Lives in `.git/strata/`:
//! - `operation.lock` — exclusive lock preventing concurrent mutating
//!   invocations (the git working directory is a process-wide resource)
//! - `continuation.json` — state of an interrupted operation, persisted at
//!   a conflict checkpoint so `st continue` / `st abort` can resume or
//!   roll back
//!
//! Branch hierarchy metadata is NOT here; see `ref_store`, which stores it
//! as git refs so it travels with push/fetch.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::program_name::program_name;

/// Maximum age for a lock file to be considered stale once its holder PID
/// is dead. Guards against racing a process that just started.
const STALE_LOCK_AGE_SECS: u64 = 300;

/// An exclusive lock on strata operations.
///
/// Held for the duration of multi-step operations (restack, sync, move,
/// merge, absorb). Released when dropped.
#[derive(Debug)]
pub struct OperationLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl OperationLock {
    /// Acquire the lock for the current repository.
    ///
    /// Fails immediately if another process holds it; stale locks left by
    /// crashed processes are cleaned up automatically.
    pub fn acquire() -> Result<Self> {
        let repo_root = find_git_root()?;
        Self::acquire_from(&repo_root)
    }

    pub fn acquire_from(repo_root: &Path) -> Result<Self> {
        let state_dir = repo_root.join(".git").join("strata");
        if !state_dir.exists() {
            fs::create_dir_all(&state_dir)?;
        }

        let lock_path = state_dir.join("operation.lock");

        match Self::try_acquire_lock(&lock_path) {
            Ok(lock) => Ok(lock),
            Err(first_error) => {
                if Self::is_lock_stale(&lock_path)? {
                    eprintln!("Cleaning up stale lock from crashed process...");
                    if let Err(e) = fs::remove_file(&lock_path) {
                        eprintln!("Warning: Could not remove stale lock: {}", e);
                    }
                    Self::try_acquire_lock(&lock_path)
                } else {
                    Err(first_error)
                }
            }
        }
    }

    fn try_acquire_lock(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(lock_path)
            .with_context(|| format!("Failed to create lock file at {:?}", lock_path))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let mut file_clone = file.try_clone()?;
                let timestamp = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                writeln!(file_clone, "{}:{}", std::process::id(), timestamp)?;

                Ok(Self {
                    file,
                    path: lock_path.to_path_buf(),
                })
            }
            Err(_) => {
                let holder_info = fs::read_to_string(lock_path).unwrap_or_default();
                let holder_pid = holder_info.split(':').next().unwrap_or("").trim();

                bail!(
                    "Another {} operation is in progress{}.\n\n\
                     If this is incorrect (e.g. after a crash), delete the lock file:\n\
                     rm {:?}",
                    program_name(),
                    if holder_pid.is_empty() {
                        String::new()
                    } else {
                        format!(" (PID: {})", holder_pid)
                    },
                    lock_path
                );
            }
        }
    }

    fn is_lock_stale(lock_path: &Path) -> Result<bool> {
        if !lock_path.exists() {
            return Ok(false);
        }

        let content = fs::read_to_string(lock_path).unwrap_or_default();
        let parts: Vec<&str> = content.trim().split(':').collect();

        let holder_pid: u32 = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
        let lock_timestamp: u64 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);

        if holder_pid == 0 {
            return Ok(false);
        }
        if is_process_running(holder_pid) {
            return Ok(false);
        }

        if lock_timestamp > 0 {
            let now = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            if now.saturating_sub(lock_timestamp) < STALE_LOCK_AGE_SECS {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // kill(pid, 0) checks existence without signaling
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    // Without a PID probe, assume the holder is alive; a wrong guess only
    // forces a manual lock removal
    true
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Kind of interrupted operation a continuation belongs to.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Restack,
    Sync,
    Move,
    Merge,
    Absorb,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restack => write!(f, "restack"),
            Self::Sync => write!(f, "sync"),
            Self::Move => write!(f, "move"),
            Self::Merge => write!(f, "merge"),
            Self::Absorb => write!(f, "absorb"),
        }
    }
}

/// Persistent state of an interrupted batch operation.
///
/// Written before the first rebase of a batch and at every checkpoint, so
/// a crash or conflict at any point leaves enough to resume:
/// - `old_bases` records the pre-batch tip of every branch the batch will
///   touch; a child rebased after its parent needs the parent's OLD tip as
///   the rebase cut point
/// - `original_branch` is where HEAD goes back to after `continue`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContinuationState {
    pub kind: OperationKind,
    pub in_progress: bool,
    /// Branch currently being rebased (the conflicted one, on conflict)
    pub current_branch: Option<String>,
    /// Branches not yet processed, in batch order
    pub remaining_branches: Vec<String>,
    /// Branches already completed (progress display on resume)
    #[serde(default)]
    pub completed_branches: Vec<String>,
    /// The branch the user was on when the operation started
    pub original_branch: String,
    /// Pre-batch tip of every branch touched by the batch
    #[serde(default)]
    pub old_bases: BTreeMap<String, String>,
    /// Branches marked merged/deleted within this batch; children of these
    /// reparent to the nearest surviving ancestor
    #[serde(default)]
    pub removed_parents: Vec<String>,
}

impl ContinuationState {
    pub fn new(kind: OperationKind, original_branch: String, branches: Vec<String>) -> Self {
        Self {
            kind,
            in_progress: true,
            current_branch: None,
            remaining_branches: branches,
            completed_branches: Vec::new(),
            original_branch,
            old_bases: BTreeMap::new(),
            removed_parents: Vec::new(),
        }
    }

    /// Load from .git/strata/continuation.json, if an operation is pending
    pub fn load() -> Result<Option<Self>> {
        let repo_root = find_git_root()?;
        Self::load_from(&repo_root)
    }

    pub fn load_from(repo_root: &Path) -> Result<Option<Self>> {
        let path = continuation_path(repo_root);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read continuation state at {:?}", path))?;
        let state: ContinuationState = serde_json::from_str(&content).with_context(|| {
            format!(
                "Continuation state file is corrupted. To recover, delete it:\n  rm {:?}",
                path
            )
        })?;

        if state.in_progress {
            Ok(Some(state))
        } else {
            Ok(None)
        }
    }

    /// Save to .git/strata/continuation.json
    pub fn save(&self) -> Result<()> {
        let repo_root = find_git_root()?;
        self.save_to(&repo_root)
    }

    pub fn save_to(&self, repo_root: &Path) -> Result<()> {
        let path = continuation_path(repo_root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        let mut file =
            File::create(&path).with_context(|| format!("Failed to create continuation file at {:?}", path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms).context("Failed to set continuation file permissions")?;
        }

        file.write_all(content.as_bytes())?;
        Ok(())
    }

    /// Delete the continuation file
    pub fn clear() -> Result<()> {
        let repo_root = find_git_root()?;
        Self::clear_from(&repo_root)
    }

    pub fn clear_from(repo_root: &Path) -> Result<()> {
        let path = continuation_path(repo_root);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn continuation_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".git").join("strata").join("continuation.json")
}

/// Acquire the operation lock and verify no operation is pending.
///
/// The entry point for every mutating command: file lock against
/// concurrent processes, plus a continuation check that routes the user to
/// `continue`/`abort` when a previous operation was interrupted.
pub fn acquire_operation_lock() -> Result<OperationLock> {
    let lock = OperationLock::acquire()?;
    check_for_interrupted_operation()?;
    Ok(lock)
}

fn check_for_interrupted_operation() -> Result<()> {
    if let Some(state) = ContinuationState::load()? {
        if state.in_progress {
            let git_rebase_active = is_git_rebase_in_progress()?;

            if !git_rebase_active {
                // The user ran `git rebase --abort` directly; the file is stale
                eprintln!(
                    "Cleaning up stale {} state (the git rebase was aborted externally)",
                    state.kind
                );
                ContinuationState::clear()?;
                return Ok(());
            }

            let mut msg = format!("A {} is already in progress.\n", state.kind);
            if let Some(ref current) = state.current_branch {
                msg.push_str(&format!("  Current branch: {}\n", current));
            }
            if !state.remaining_branches.is_empty() {
                msg.push_str(&format!("  Remaining: {} branches\n", state.remaining_branches.len()));
            }
            msg.push_str(&format!(
                "\nUse '{} continue' after resolving conflicts, or '{} abort' to cancel.",
                program_name(),
                program_name()
            ));
            bail!("{}", msg);
        }
    }
    Ok(())
}

fn is_git_rebase_in_progress() -> Result<bool> {
    let repo_root = find_git_root()?;
    let git_dir = repo_root.join(".git");
    Ok(git_dir.join("rebase-merge").exists() || git_dir.join("rebase-apply").exists())
}

/// Find the root of the git repository.
///
/// In test mode, uses the thread-local test repository path if set.
pub fn find_git_root() -> Result<PathBuf> {
    #[cfg(test)]
    if let Some(path) = crate::test_context::test_repo_path() {
        if path.join(".git").exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    let mut dir = current_dir.as_path();

    loop {
        if dir.join(".git").exists() {
            return Ok(dir.to_path_buf());
        }
        match dir.parent() {
            Some(parent) => dir = parent,
            None => anyhow::bail!("Not inside a git repository"),
        }
    }
}
