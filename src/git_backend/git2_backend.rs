//! git2 (libgit2) implementation of GitBackend.
//!
//! Fast, in-process git operations. Only valid for repositories using the
//! "files" ref format.

use anyhow::{Context, Result};
use git2::{BranchType, IndexAddOption, Repository, Signature};
use std::cell::RefCell;
use std::path::{Path, PathBuf};

use super::{GitBackend, Oid, RefFormat};

/// git2-based backend implementation.
///
/// The repository handle lives behind a `RefCell` so `refresh()` can re-open
/// it after external ref writes; libgit2 caches packed refs per handle.
pub struct Git2Backend {
    repo: RefCell<Repository>,
    git_dir: PathBuf,
    workdir: PathBuf,
}

impl Git2Backend {
    /// Open a repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).context("Failed to open git repository with git2")?;

        let git_dir = repo.path().to_path_buf();
        let workdir = repo.workdir().context("Not a work tree")?.to_path_buf();

        Ok(Self {
            repo: RefCell::new(repo),
            git_dir,
            workdir,
        })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        let repo = self.repo.borrow();
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("strata", "strata@local"))
            .context("Failed to create signature")?;
        Ok(sig.to_owned())
    }

    fn resolve_commit_oid(&self, reference: &str) -> Result<git2::Oid> {
        let repo = self.repo.borrow();
        let obj = repo
            .revparse_single(reference)
            .context(format!("Failed to resolve '{}'", reference))?;
        let commit = obj.peel_to_commit().context("Ref does not point at a commit")?;
        Ok(commit.id())
    }
}

impl GitBackend for Git2Backend {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ref_format(&self) -> RefFormat {
        RefFormat::Files
    }

    fn refresh(&self) -> Result<()> {
        let repo = Repository::open(&self.workdir).context("Failed to re-open repository")?;
        *self.repo.borrow_mut() = repo;
        Ok(())
    }

    fn get_current_branch(&self) -> Result<String> {
        let repo = self.repo.borrow();
        let head = repo.head().context("Failed to get HEAD")?;

        if !head.is_branch() {
            anyhow::bail!("HEAD is detached");
        }

        head.shorthand()
            .map(|s| s.to_string())
            .context("Branch name is not valid UTF-8")
    }

    fn is_on_branch(&self) -> Result<bool> {
        let repo = self.repo.borrow();
        let result = match repo.head() {
            Ok(head) => Ok(head.is_branch()),
            Err(_) => Ok(false),
        };
        result
    }

    fn create_branch_at(&self, name: &str, at_ref: &str) -> Result<()> {
        let repo = self.repo.borrow();
        let obj = repo
            .revparse_single(at_ref)
            .context(format!("Failed to find ref '{}'", at_ref))?;
        let commit = obj.peel_to_commit().context("Failed to get commit for ref")?;

        repo.branch(name, &commit, false)
            .context(format!("Failed to create branch '{}' at '{}'", name, at_ref))?;

        Ok(())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let repo = self.repo.borrow();
        let result = Ok(repo.find_branch(name, BranchType::Local).is_ok());
        result
    }

    fn checkout_branch(&self, name: &str) -> Result<()> {
        let repo = self.repo.borrow();
        let refname = format!("refs/heads/{}", name);

        let reference = repo
            .find_reference(&refname)
            .context(format!("Branch '{}' not found", name))?;
        let commit = reference
            .peel_to_commit()
            .context("Failed to peel reference to commit")?;
        let tree = commit.tree().context("Failed to get commit tree")?;

        // Safe mode: never overwrite uncommitted changes or remove untracked
        // files, exactly like `git checkout`.
        let mut checkout = git2::build::CheckoutBuilder::new();
        checkout.safe().recreate_missing(true);

        repo.checkout_tree(tree.as_object(), Some(&mut checkout))
            .context("Failed to checkout tree")?;
        repo.set_head(&refname)
            .context(format!("Failed to set HEAD to '{}'", name))?;

        Ok(())
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        let repo = self.repo.borrow();
        let mut branches = Vec::new();

        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                branches.push(name.to_string());
            }
        }

        branches.sort();
        Ok(branches)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        let repo = self.repo.borrow();
        let mut branch = repo
            .find_branch(name, BranchType::Local)
            .context(format!("Branch '{}' not found", name))?;
        branch.delete().context(format!("Failed to delete branch '{}'", name))
    }

    fn stage_all(&self) -> Result<()> {
        let repo = self.repo.borrow();
        let mut index = repo.index().context("Failed to get index")?;
        index
            .add_all(["*"], IndexAddOption::DEFAULT, None)
            .context("Failed to stage changes")?;
        index.write().context("Failed to write index")?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<()> {
        let sig = self.signature()?;
        let repo = self.repo.borrow();

        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let parent = repo.head()?.peel_to_commit()?;
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
            .context("Failed to create commit")?;

        Ok(())
    }

    fn amend_commit(&self, message: Option<&str>) -> Result<()> {
        let repo = self.repo.borrow();

        let mut index = repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;

        let head = repo.head()?.peel_to_commit()?;
        head.amend(Some("HEAD"), None, None, None, message, Some(&tree))
            .context("Failed to amend commit")?;

        Ok(())
    }

    fn create_reference(&self, name: &str, target: &Oid, force: bool, msg: &str) -> Result<()> {
        let repo = self.repo.borrow();
        let oid = git2::Oid::from_str(target.as_str()).context("Invalid OID")?;
        repo.reference(name, oid, force, msg)
            .context(format!("Failed to create reference '{}'", name))?;
        Ok(())
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        let repo = self.repo.borrow();
        let result = match repo.find_reference(name) {
            Ok(mut reference) => reference
                .delete()
                .context(format!("Failed to delete reference '{}'", name)),
            // Deleting a missing ref is a no-op
            Err(_) => Ok(()),
        };
        result
    }

    fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        let repo = self.repo.borrow();
        let result = match repo.find_reference(name) {
            Ok(reference) => {
                let oid = reference
                    .target()
                    .context(format!("Reference '{}' is symbolic", name))?;
                Ok(Some(Oid::from(oid)))
            }
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e).context(format!("Failed to look up reference '{}'", name)),
        };
        result
    }

    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        let repo = self.repo.borrow();
        let mut refs = Vec::new();

        for reference in repo.references_glob(pattern)? {
            let reference = reference?;
            if let (Some(name), Some(target)) = (reference.name(), reference.target()) {
                refs.push((name.to_string(), Oid::from(target)));
            }
        }

        refs.sort();
        Ok(refs)
    }

    fn create_blob(&self, content: &[u8]) -> Result<Oid> {
        let repo = self.repo.borrow();
        let oid = repo.blob(content).context("Failed to create blob")?;
        Ok(Oid::from(oid))
    }

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        let repo = self.repo.borrow();
        let git_oid = git2::Oid::from_str(oid.as_str()).context("Invalid OID")?;
        let blob = repo
            .find_blob(git_oid)
            .context(format!("Blob {} not found", oid.short()))?;
        Ok(blob.content().to_vec())
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        let repo = self.repo.borrow();
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let repo = self.repo.borrow();
        let statuses = repo.statuses(None)?;
        Ok(statuses.iter().any(|s| {
            s.status().intersects(
                git2::Status::INDEX_NEW
                    | git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_DELETED
                    | git2::Status::INDEX_RENAMED
                    | git2::Status::INDEX_TYPECHANGE,
            )
        }))
    }

    fn has_staged_or_modified_changes(&self) -> Result<bool> {
        let repo = self.repo.borrow();
        let statuses = repo.statuses(None)?;
        Ok(statuses.iter().any(|s| {
            s.status().intersects(
                git2::Status::INDEX_NEW
                    | git2::Status::INDEX_MODIFIED
                    | git2::Status::INDEX_DELETED
                    | git2::Status::INDEX_RENAMED
                    | git2::Status::INDEX_TYPECHANGE
                    | git2::Status::WT_MODIFIED
                    | git2::Status::WT_DELETED
                    | git2::Status::WT_TYPECHANGE,
            )
        }))
    }

    fn get_merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        let oid_a = self.resolve_commit_oid(a)?;
        let oid_b = self.resolve_commit_oid(b)?;
        let repo = self.repo.borrow();
        let base = repo
            .merge_base(oid_a, oid_b)
            .context(format!("No merge base between '{}' and '{}'", a, b))?;
        Ok(Oid::from(base))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let anc = self.resolve_commit_oid(ancestor)?;
        let desc = self.resolve_commit_oid(descendant)?;
        if anc == desc {
            return Ok(true);
        }
        let repo = self.repo.borrow();
        repo.graph_descendant_of(desc, anc)
            .context("Failed to compute ancestry")
    }

    fn get_ref_sha(&self, reference: &str) -> Result<Oid> {
        let oid = self.resolve_commit_oid(reference)?;
        Ok(Oid::from(oid))
    }

    fn get_commit_subject(&self, reference: &str) -> Result<String> {
        let repo = self.repo.borrow();
        let obj = repo
            .revparse_single(reference)
            .context(format!("Failed to resolve '{}'", reference))?;
        let commit = obj.peel_to_commit()?;
        Ok(commit.summary().unwrap_or("").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_test_repo};
    use tempfile::tempdir;

    #[test]
    fn test_open_and_paths() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;

        let backend = Git2Backend::open(dir.path())?;
        assert!(backend.git_dir().ends_with(".git"));
        Ok(())
    }

    #[test]
    fn test_current_branch_is_main() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;

        let backend = Git2Backend::open(dir.path())?;
        assert_eq!(backend.get_current_branch()?, "main");
        assert!(backend.is_on_branch()?);
        Ok(())
    }

    #[test]
    fn test_create_and_delete_branch() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;

        let backend = Git2Backend::open(dir.path())?;
        backend.create_branch_at("feature", "main")?;
        assert!(backend.branch_exists("feature")?);

        backend.delete_branch("feature")?;
        assert!(!backend.branch_exists("feature")?);
        Ok(())
    }

    #[test]
    fn test_blob_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;

        let backend = Git2Backend::open(dir.path())?;
        let oid = backend.create_blob(b"payload")?;
        assert_eq!(backend.read_blob(&oid)?, b"payload");
        Ok(())
    }

    #[test]
    fn test_reference_lifecycle() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;

        let backend = Git2Backend::open(dir.path())?;
        let blob = backend.create_blob(b"main")?;
        backend.create_reference("refs/strata/meta/feature", &blob, true, "test")?;

        let found = backend.find_reference("refs/strata/meta/feature")?;
        assert_eq!(found, Some(blob));

        let listed = backend.list_references("refs/strata/meta/*")?;
        assert_eq!(listed.len(), 1);

        backend.delete_reference("refs/strata/meta/feature")?;
        assert!(backend.find_reference("refs/strata/meta/feature")?.is_none());
        // Idempotent
        backend.delete_reference("refs/strata/meta/feature")?;
        Ok(())
    }

    #[test]
    fn test_is_ancestor_and_merge_base() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let base = repo.head()?.peel_to_commit()?.id().to_string();

        commit_file(&repo, "a.txt", "one\n", "add a")?;

        let backend = Git2Backend::open(dir.path())?;
        assert!(backend.is_ancestor(&base, "main")?);
        assert!(!backend.is_ancestor("main", &base)?);

        let mb = backend.get_merge_base(&base, "main")?;
        assert_eq!(mb.as_str(), base);
        Ok(())
    }
}
