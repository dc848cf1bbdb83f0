//! Precondition checks shared by mutating commands.

use anyhow::Result;
use colored::Colorize;

use crate::git_gateway::GitGateway;
use crate::program_name::program_name;
use crate::ref_store::RefStore;

/// The current branch name, failing with guidance on detached HEAD.
pub fn require_on_branch(gateway: &GitGateway) -> Result<String> {
    if !gateway.is_on_branch()? {
        anyhow::bail!(
            "HEAD is detached. Checkout a branch first:\n  git checkout <branch>"
        );
    }
    gateway.get_current_branch_name()
}

/// Fail unless the branch has a metadata record.
pub fn require_tracked(store: &RefStore, branch: &str) -> Result<()> {
    if !store.is_tracked(branch)? {
        anyhow::bail!(
            "Branch '{}' is not tracked. Track it first:\n  {} track {} --parent <branch>",
            branch,
            program_name(),
            branch
        );
    }
    Ok(())
}

/// Fail when the branch is trunk.
pub fn require_not_trunk(branch: &str, trunk: &str) -> Result<()> {
    if branch == trunk {
        anyhow::bail!("Cannot do that to the trunk branch '{}'.", trunk);
    }
    Ok(())
}

/// Fail when a git rebase or merge is already underway.
pub fn require_no_operation_in_progress(gateway: &GitGateway) -> Result<()> {
    if gateway.rebase_in_progress()? {
        anyhow::bail!(
            "A git rebase is in progress. Finish it first:\n  \
             {} continue   (or: git rebase --abort)",
            program_name()
        );
    }
    if gateway.merge_in_progress()? {
        anyhow::bail!("A git merge is in progress. Finish or abort it first.");
    }
    Ok(())
}

/// Metadata records whose git branch no longer exists are an internal
/// inconsistency (someone deleted the ref outside the tool). Repair by
/// reparenting the record's children to its parent and dropping the
/// record, and tell the user what happened.
pub fn repair_orphaned_metadata(gateway: &GitGateway, store: &RefStore) -> Result<Vec<String>> {
    let mut repaired = Vec::new();

    for branch in store.list_tracked_branches()? {
        if gateway.branch_exists(&branch)? {
            continue;
        }

        eprintln!(
            "{} Tracked branch '{}' no longer exists in git; removing its record. \
             Re-track it with '{} track {}' if this is wrong.",
            "!".yellow(),
            branch,
            program_name(),
            branch
        );
        store.remove_branch_reparent(&branch)?;
        repaired.push(branch);
    }

    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    #[test]
    fn test_require_on_branch_ok() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let gateway = GitGateway::new()?;
        assert_eq!(require_on_branch(&gateway)?, "main");
        Ok(())
    }

    #[test]
    fn test_require_on_branch_detached_fails() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let head = repo.head()?.peel_to_commit()?.id();
        repo.set_head_detached(head)?;

        let gateway = GitGateway::new()?;
        assert!(require_on_branch(&gateway).is_err());
        Ok(())
    }

    #[test]
    fn test_require_tracked_fails_for_untracked() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        let err = require_tracked(&store, "feature").unwrap_err().to_string();
        assert!(err.contains("not tracked"));
        Ok(())
    }

    #[test]
    fn test_require_not_trunk() {
        assert!(require_not_trunk("main", "main").is_err());
        assert!(require_not_trunk("feature", "main").is_ok());
    }

    #[test]
    fn test_repair_removes_records_for_missing_branches() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;

        let head = repo.head()?.peel_to_commit()?;
        repo.branch("real", &head, false)?;
        repo.branch("doomed", &head, false)?;
        store.set_parent("doomed", "main")?;
        store.set_parent("real", "doomed")?;

        // Delete the git ref, leaving the record behind
        repo.find_branch("doomed", git2::BranchType::Local)?.delete()?;

        let gateway = GitGateway::new()?;
        let repaired = repair_orphaned_metadata(&gateway, &store)?;
        assert_eq!(repaired, vec!["doomed"]);
        assert!(!store.is_tracked("doomed")?);
        // The child fell through to the grandparent
        assert_eq!(store.get_parent("real")?.as_deref(), Some("main"));
        Ok(())
    }
}
