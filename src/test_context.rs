//! Thread-local test context for parallel test execution.
//!
//! Tests never call `std::env::set_current_dir()` (a process-wide operation
//! that would force serial execution). Instead they install a
//! `TestRepoContext`, a thread-local repository path consulted by
//! `GitGateway::new()` and `RefStore::new()` when compiled for tests.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[cfg(test)]
use anyhow::Result;

thread_local! {
    static TEST_REPO_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// RAII guard for setting the test repository path in the current thread.
///
/// The `PhantomData<*const ()>` makes this type `!Send`, preventing it from
/// being moved across thread boundaries.
pub struct TestRepoContext {
    _phantom: PhantomData<*const ()>,
}

impl TestRepoContext {
    pub fn new(path: &Path) -> Self {
        TEST_REPO_PATH.with(|p| *p.borrow_mut() = Some(path.to_path_buf()));
        Self { _phantom: PhantomData }
    }
}

impl Drop for TestRepoContext {
    fn drop(&mut self) {
        TEST_REPO_PATH.with(|p| *p.borrow_mut() = None);
    }
}

/// Get the current thread-local test repository path, if set.
pub(crate) fn test_repo_path() -> Option<PathBuf> {
    TEST_REPO_PATH.with(|p| p.borrow().clone())
}

/// Initialize a test repository with consistent "main" branch naming.
///
/// Creates a git repository with an initial commit on `main` regardless of
/// the host's `init.defaultBranch`, and the `.git/strata/` state directory.
#[cfg(test)]
pub fn init_test_repo(path: &Path) -> Result<git2::Repository> {
    use std::fs;

    let repo = git2::Repository::init(path)?;

    let mut config = repo.config()?;
    config.set_str("user.name", "Test User")?;
    config.set_str("user.email", "test@example.com")?;
    drop(config);

    let sig = git2::Signature::now("Test User", "test@example.com")?;
    let tree_id = repo.index()?.write_tree()?;
    let tree = repo.find_tree(tree_id)?;
    repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])?;
    drop(tree);

    {
        let mut branch = repo
            .find_branch("master", git2::BranchType::Local)
            .or_else(|_| repo.find_branch("main", git2::BranchType::Local))?;
        if branch.name()?.unwrap_or("") == "master" {
            branch.rename("main", false)?;
        }
    }
    repo.set_head("refs/heads/main")?;

    fs::create_dir_all(path.join(".git").join("strata"))?;

    Ok(repo)
}

/// Create a commit on the current branch of a test repository.
///
/// Writes `file` with `content`, stages it, and commits with `message`.
#[cfg(test)]
pub fn commit_file(repo: &git2::Repository, file: &str, content: &str, message: &str) -> Result<git2::Oid> {
    use std::fs;

    let workdir = repo.workdir().expect("test repo has a workdir");
    if let Some(parent) = Path::new(file).parent() {
        fs::create_dir_all(workdir.join(parent))?;
    }
    fs::write(workdir.join(file), content)?;

    let mut index = repo.index()?;
    index.add_path(Path::new(file))?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let sig = git2::Signature::now("Test User", "test@example.com")?;
    let parent_commit = repo.head()?.peel_to_commit()?;
    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent_commit])?;
    Ok(oid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_context_sets_and_clears_path() {
        let dir = tempdir().unwrap();

        assert!(test_repo_path().is_none());
        {
            let _ctx = TestRepoContext::new(dir.path());
            assert_eq!(test_repo_path(), Some(dir.path().to_path_buf()));
        }
        assert!(test_repo_path().is_none());
    }

    #[test]
    fn test_context_clears_on_panic() {
        let dir = tempdir().unwrap();

        let result = std::panic::catch_unwind(|| {
            let _ctx = TestRepoContext::new(dir.path());
            panic!("intentional panic");
        });

        assert!(result.is_err());
        assert!(test_repo_path().is_none());
    }

    #[test]
    fn test_init_test_repo_uses_main() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        assert_eq!(repo.head()?.shorthand(), Some("main"));
        Ok(())
    }

    #[test]
    fn test_commit_file_advances_head() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let before = repo.head()?.peel_to_commit()?.id();
        commit_file(&repo, "a.txt", "hello\n", "add a")?;
        let after = repo.head()?.peel_to_commit()?.id();
        assert_ne!(before, after);
        Ok(())
    }
}
