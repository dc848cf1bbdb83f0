//! Git backend abstraction for reftable compatibility.
//!
//! libgit2 does not support the reftable ref format (Git 2.45+). Rather than
//! scattering `if reftable { subprocess } else { git2 }` checks through the
//! codebase, low-level git operations go through a `GitBackend` trait with
//! two implementations:
//!
//! - `Git2Backend` (libgit2) for files-format repositories
//! - `SubprocessBackend` (git CLI) for any format, including reftable
//!
//! Most code should use `GitGateway`, which layers higher-level operations
//! (rebase, diff parsing, patch-id, stash, worktrees) on top of a backend
//! and handles backend selection automatically.
//!
//! This module also defines the canonical `Oid` and `RefFormat` types used
//! throughout strata.

mod git2_backend;
mod subprocess_backend;

pub use git2_backend::Git2Backend;
pub use subprocess_backend::SubprocessBackend;

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

/// Git ref storage format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefFormat {
    /// Traditional loose refs + packed-refs
    Files,
    /// Binary reftable format (Git 2.45+)
    Reftable,
}

/// Git object ID (40-character hex string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(String);

impl Oid {
    /// Create an Oid from a hex string (validates format)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 40 {
            anyhow::bail!("Invalid OID length: expected 40, got {}", s.len());
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            anyhow::bail!("Invalid OID: contains non-hex characters");
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Create an Oid without validation, for strings taken from git output
    pub(crate) fn from_str_unchecked(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 7 chars)
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<git2::Oid> for Oid {
    fn from(oid: git2::Oid) -> Self {
        Self(oid.to_string())
    }
}

/// Unified backend for low-level git operations.
///
/// Abstracts over git2 and subprocess implementations, allowing transparent
/// reftable support.
pub trait GitBackend: Send {
    /// Path to .git directory
    fn git_dir(&self) -> &Path;

    /// Path to working directory
    fn workdir(&self) -> &Path;

    /// The ref format this repo uses
    fn ref_format(&self) -> RefFormat;

    /// Drop any cached view of the object database and refs.
    ///
    /// Must be called after an external process (the git CLI) writes refs
    /// that this backend will subsequently read, so that reads observe the
    /// write.
    fn refresh(&self) -> Result<()>;

    // =========================================================================
    // Branch operations
    // =========================================================================

    /// Get the current branch name (fails if detached HEAD)
    fn get_current_branch(&self) -> Result<String>;

    /// Check if currently on a branch (not detached HEAD)
    fn is_on_branch(&self) -> Result<bool>;

    /// Create a new branch at a specific ref without checking it out
    fn create_branch_at(&self, name: &str, at_ref: &str) -> Result<()>;

    /// Check if a local branch exists
    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Checkout a branch (safe mode, preserves uncommitted changes)
    fn checkout_branch(&self, name: &str) -> Result<()>;

    /// List all local branches
    fn list_branches(&self) -> Result<Vec<String>>;

    /// Delete a local branch
    fn delete_branch(&self, name: &str) -> Result<()>;

    // =========================================================================
    // Commit operations
    // =========================================================================

    /// Stage all changes (git add -A)
    fn stage_all(&self) -> Result<()>;

    /// Create a commit with a message
    fn commit(&self, message: &str) -> Result<()>;

    /// Amend the last commit, optionally replacing the message
    fn amend_commit(&self, message: Option<&str>) -> Result<()>;

    // =========================================================================
    // Ref operations (strata's metadata refs live here)
    // =========================================================================

    /// Create or update a reference pointing to an OID
    fn create_reference(&self, name: &str, target: &Oid, force: bool, msg: &str) -> Result<()>;

    /// Delete a reference (idempotent)
    fn delete_reference(&self, name: &str) -> Result<()>;

    /// Find a reference, returning its target OID
    fn find_reference(&self, name: &str) -> Result<Option<Oid>>;

    /// List references matching a glob pattern
    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>>;

    // =========================================================================
    // Blob operations (metadata payloads are blobs)
    // =========================================================================

    /// Create a blob from content, returns its OID
    fn create_blob(&self, content: &[u8]) -> Result<Oid>;

    /// Read a blob's content by OID
    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>>;

    // =========================================================================
    // Status / ancestry
    // =========================================================================

    /// Check for any uncommitted changes (staged or unstaged)
    fn has_uncommitted_changes(&self) -> Result<bool>;

    /// Check for staged changes only
    fn has_staged_changes(&self) -> Result<bool>;

    /// Check for staged or modified (but not untracked) files
    fn has_staged_or_modified_changes(&self) -> Result<bool>;

    /// Get the merge base of two refs
    fn get_merge_base(&self, a: &str, b: &str) -> Result<Oid>;

    /// Check if a ref is an ancestor of (or equal to) another
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Get the SHA a branch or ref resolves to
    fn get_ref_sha(&self, reference: &str) -> Result<Oid>;

    /// Get the commit subject line
    fn get_commit_subject(&self, reference: &str) -> Result<String>;
}

/// Detect the ref format of a repository
pub fn detect_ref_format(path: &Path) -> Result<RefFormat> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-ref-format"])
        .current_dir(path)
        .output()
        .context("Failed to detect ref format")?;

    if !output.status.success() {
        // Older git or not a repo - assume files format
        return Ok(RefFormat::Files);
    }

    let format = String::from_utf8_lossy(&output.stdout);
    match format.trim() {
        "reftable" => Ok(RefFormat::Reftable),
        _ => Ok(RefFormat::Files),
    }
}

/// Create the appropriate backend for a repository
pub fn create_backend(path: &Path) -> Result<Box<dyn GitBackend>> {
    let format = detect_ref_format(path)?;

    match format {
        RefFormat::Reftable => Ok(Box::new(SubprocessBackend::open(path)?)),
        RefFormat::Files => match Git2Backend::open(path) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(_) => Ok(Box::new(SubprocessBackend::open(path)?)),
        },
    }
}
