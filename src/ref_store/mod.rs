//! RefStore: branch metadata persisted inside the git object database.
//!
//! Each tracked branch has one record stored as a JSON blob pointed to by
//! `refs/strata/meta/<branch>`. The record carries the parent name, the
//! optional scope, attached PR info, the squashed-merge / fast-forward
//! repair markers, and a remote-tracking SHA hint.
//!
//! Refs travel with push/fetch, unlike files under .git, and writes are
//! atomic per ref. Children are DERIVED by scanning all metadata refs, not
//! stored. Trunk configuration is a blob under `refs/strata/config/trunk`.
//!
//! Unknown JSON fields are ignored on read, so records written by newer
//! versions of the tool remain parseable by older ones.

pub mod meta;
mod traversal;
mod trunk;

#[cfg(test)]
mod tests;

pub use meta::{validate_branch_name, BranchMetadata};

use crate::git_gateway::GitGateway;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;

/// Prefix for per-branch metadata refs
pub(crate) const META_REF_PREFIX: &str = "refs/strata/meta/";
/// Ref holding the trunk branch name
pub(crate) const TRUNK_REF: &str = "refs/strata/config/trunk";

/// RefStore manages stack metadata using git refs pointing to blobs.
pub struct RefStore {
    pub(crate) gateway: GitGateway,
}

impl RefStore {
    /// Create a RefStore for the repository containing the current directory.
    ///
    /// In test mode, uses the thread-local test repository path set via
    /// `TestRepoContext`.
    pub fn new() -> Result<Self> {
        #[cfg(test)]
        {
            if let Some(path) = crate::test_context::test_repo_path() {
                return Self::from_path(&path);
            }

            panic!(
                "RefStore::new() called in test without TestRepoContext!\n\
                 Use TestRepoContext in your test:\n\
                 \n\
                 let dir = tempdir()?;\n\
                 let _repo = init_test_repo(dir.path())?;\n\
                 let _ctx = TestRepoContext::new(dir.path());"
            );
        }

        #[cfg(not(test))]
        {
            let gateway = GitGateway::new()?;
            Ok(Self { gateway })
        }
    }

    /// Create a RefStore from a specific path
    pub fn from_path(path: &Path) -> Result<Self> {
        let gateway = GitGateway::from_path(path).context("Failed to open repository")?;
        Ok(Self { gateway })
    }

    fn meta_ref(branch: &str) -> String {
        format!("{}{}", META_REF_PREFIX, branch)
    }

    /// Read a branch's metadata record, or None if untracked
    pub fn read_metadata(&self, branch: &str) -> Result<Option<BranchMetadata>> {
        let payload = match self.gateway.read_blob_ref(&Self::meta_ref(branch))? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let meta: BranchMetadata = serde_json::from_slice(&payload).with_context(|| {
            format!(
                "Corrupted metadata for branch '{}'. Re-track it with 'st track {}'.",
                branch, branch
            )
        })?;
        Ok(Some(meta))
    }

    /// Write a branch's metadata record.
    ///
    /// The write is atomic at the ref level; a crash between blob creation
    /// and ref update leaves only an orphan blob behind.
    pub fn write_metadata(&self, branch: &str, meta: &BranchMetadata) -> Result<()> {
        if let Some(parent) = &meta.parent {
            if parent == branch {
                anyhow::bail!(
                    "Branch '{}' cannot be its own parent. This would create a circular reference.",
                    branch
                );
            }
            validate_branch_name(parent, branch)?;
        }

        let payload = serde_json::to_vec(meta).context("Failed to serialize branch metadata")?;
        self.gateway
            .write_blob_ref(
                &Self::meta_ref(branch),
                &payload,
                &format!("st: update metadata for {}", branch),
            )
            .context(format!("Failed to write metadata ref for {}", branch))
    }

    /// Read-modify-write a branch's metadata record
    pub fn update_metadata<F>(&self, branch: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut BranchMetadata),
    {
        let mut meta = self
            .read_metadata(branch)?
            .with_context(|| format!("Branch '{}' is not tracked", branch))?;
        f(&mut meta);
        self.write_metadata(branch, &meta)
    }

    /// Remove a branch's metadata record (untrack)
    pub fn remove_metadata(&self, branch: &str) -> Result<()> {
        self.gateway
            .delete_reference(&Self::meta_ref(branch))
            .context(format!("Failed to delete metadata ref for {}", branch))
    }

    /// A branch is tracked iff its metadata record exists
    pub fn is_tracked(&self, branch: &str) -> Result<bool> {
        Ok(self.gateway.find_reference(&Self::meta_ref(branch))?.is_some())
    }

    /// Get a branch's parent name
    pub fn get_parent(&self, branch: &str) -> Result<Option<String>> {
        Ok(self.read_metadata(branch)?.and_then(|m| m.parent))
    }

    /// Set a branch's parent, validating that the parent ref exists
    pub fn set_parent(&self, branch: &str, parent: &str) -> Result<()> {
        if !self.gateway.branch_exists(parent)? {
            anyhow::bail!(
                "Parent branch '{}' does not exist. Cannot set parent relationship.",
                parent
            );
        }

        let mut meta = self.read_metadata(branch)?.unwrap_or_default();
        meta.parent = Some(parent.to_string());
        self.write_metadata(branch, &meta)
    }

    /// Reparent a branch to a new parent
    pub fn reparent(&self, branch: &str, new_parent: &str) -> Result<()> {
        self.set_parent(branch, new_parent)
    }

    /// A branch's own scope, not following inheritance
    pub fn get_scope(&self, branch: &str) -> Result<Option<String>> {
        Ok(self.read_metadata(branch)?.and_then(|m| m.scope))
    }

    /// A branch's effective scope: its own, or the nearest ancestor's.
    ///
    /// Scopes propagate by inheritance; a branch with no explicit scope
    /// carries its parent's.
    pub fn effective_scope(&self, branch: &str) -> Result<Option<String>> {
        let mut current = branch.to_string();
        let mut seen = BTreeSet::new();

        loop {
            if !seen.insert(current.clone()) {
                anyhow::bail!("Circular parent reference detected at '{}'", current);
            }
            let meta = match self.read_metadata(&current)? {
                Some(m) => m,
                None => return Ok(None),
            };
            if meta.scope.is_some() {
                return Ok(meta.scope);
            }
            match meta.parent {
                Some(parent) => current = parent,
                None => return Ok(None),
            }
        }
    }

    /// All children of a branch (derived by scanning all metadata refs)
    pub fn get_children(&self, parent: &str) -> Result<BTreeSet<String>> {
        let mut children = BTreeSet::new();

        let pattern = format!("{}*", META_REF_PREFIX);
        for (ref_name, oid) in self.gateway.list_references(&pattern)? {
            let child = match ref_name.strip_prefix(META_REF_PREFIX) {
                Some(c) => c,
                None => continue,
            };
            if let Ok(bytes) = self.gateway.read_blob(&oid) {
                if let Ok(meta) = serde_json::from_slice::<BranchMetadata>(&bytes) {
                    if meta.parent.as_deref() == Some(parent) {
                        children.insert(child.to_string());
                    }
                }
            }
        }

        Ok(children)
    }

    /// Register a branch with an optional parent and scope
    pub fn register_branch(&self, branch: &str, parent: Option<&str>, scope: Option<&str>) -> Result<()> {
        let mut meta = self.read_metadata(branch)?.unwrap_or_default();
        meta.parent = parent.map(String::from);
        meta.scope = scope.map(String::from);
        self.write_metadata(branch, &meta)
    }

    /// Remove a branch's record and reparent its children to its parent.
    ///
    /// Used when deleting a middle branch in a stack.
    pub fn remove_branch_reparent(&self, branch: &str) -> Result<Vec<String>> {
        let parent = self.get_parent(branch)?;
        let children: Vec<String> = self.get_children(branch)?.into_iter().collect();

        for child in &children {
            self.update_metadata(child, |meta| {
                meta.parent = parent.clone();
            })?;
        }

        self.remove_metadata(branch)?;
        Ok(children)
    }

    /// Remove all strata tracking data (for init --reset)
    pub fn clear_all(&self) -> Result<()> {
        let pattern = format!("{}*", META_REF_PREFIX);
        for (ref_name, _) in self.gateway.list_references(&pattern)? {
            self.gateway.delete_reference(&ref_name).ok();
        }
        self.gateway.delete_reference(TRUNK_REF).ok();
        Ok(())
    }

    /// Access the underlying gateway
    pub fn gateway(&self) -> &GitGateway {
        &self.gateway
    }
}
