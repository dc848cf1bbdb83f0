//! RefStore tests over real temporary repositories.

use anyhow::Result;
use tempfile::tempdir;

use super::*;
use crate::forge::{PrRecord, PrState};
use crate::test_context::{init_test_repo, TestRepoContext};

fn create_branch(repo: &git2::Repository, name: &str) -> Result<()> {
    let head = repo.head()?.peel_to_commit()?;
    repo.branch(name, &head, false)?;
    Ok(())
}

#[test]
fn test_untracked_branch_has_no_metadata() -> Result<()> {
    let dir = tempdir()?;
    let _repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());

    let store = RefStore::new()?;
    assert!(store.read_metadata("nope")?.is_none());
    assert!(!store.is_tracked("nope")?);
    Ok(())
}

#[test]
fn test_metadata_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "feature")?;

    let store = RefStore::new()?;
    let meta = BranchMetadata {
        parent: Some("main".to_string()),
        scope: Some("TCK-7".to_string()),
        ..Default::default()
    };
    store.write_metadata("feature", &meta)?;

    let read = store.read_metadata("feature")?.unwrap();
    assert_eq!(read, meta);
    assert!(store.is_tracked("feature")?);
    Ok(())
}

#[test]
fn test_read_your_own_writes() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "feature")?;

    let store = RefStore::new()?;
    store.set_parent("feature", "main")?;
    assert_eq!(store.get_parent("feature")?.as_deref(), Some("main"));

    // A second store instance (fresh handle) observes the same value
    let store2 = RefStore::new()?;
    assert_eq!(store2.get_parent("feature")?.as_deref(), Some("main"));
    Ok(())
}

#[test]
fn test_self_parent_rejected() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "feature")?;

    let store = RefStore::new()?;
    let result = store.set_parent("feature", "feature");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("own parent"));
    Ok(())
}

#[test]
fn test_missing_parent_rejected() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "feature")?;

    let store = RefStore::new()?;
    assert!(store.set_parent("feature", "no-such-branch").is_err());
    Ok(())
}

#[test]
fn test_corrupted_metadata_surfaces_retrack_hint() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "feature")?;

    // Write garbage directly into the metadata ref
    let blob = repo.blob(b"{ not json")?;
    repo.reference("refs/strata/meta/feature", blob, true, "corrupt")?;

    let store = RefStore::new()?;
    let err = store.read_metadata("feature").unwrap_err().to_string();
    assert!(err.contains("Corrupted metadata"), "got: {}", err);
    assert!(err.contains("track"), "got: {}", err);
    Ok(())
}

#[test]
fn test_children_derived_from_records() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "a")?;
    create_branch(&repo, "b")?;
    create_branch(&repo, "c")?;

    let store = RefStore::new()?;
    store.set_parent("a", "main")?;
    store.set_parent("b", "main")?;
    store.set_parent("c", "a")?;

    let children = store.get_children("main")?;
    assert!(children.contains("a"));
    assert!(children.contains("b"));
    assert!(!children.contains("c"));
    Ok(())
}

#[test]
fn test_remove_branch_reparent_moves_children_to_grandparent() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "p")?;
    create_branch(&repo, "c1")?;
    create_branch(&repo, "c2")?;

    let store = RefStore::new()?;
    store.set_trunk("main")?;
    store.set_parent("p", "main")?;
    store.set_parent("c1", "p")?;
    store.set_parent("c2", "p")?;

    let reparented = store.remove_branch_reparent("p")?;
    assert_eq!(reparented.len(), 2);
    assert!(!store.is_tracked("p")?);
    assert_eq!(store.get_parent("c1")?.as_deref(), Some("main"));
    assert_eq!(store.get_parent("c2")?.as_deref(), Some("main"));
    Ok(())
}

#[test]
fn test_trunk_roundtrip() -> Result<()> {
    let dir = tempdir()?;
    let _repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());

    let store = RefStore::new()?;
    assert!(store.get_trunk()?.is_none());
    assert!(store.require_trunk().is_err());

    store.set_trunk("main")?;
    assert_eq!(store.require_trunk()?, "main");
    Ok(())
}

#[test]
fn test_ancestors_ordering_and_trunk_exclusion() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "a")?;
    create_branch(&repo, "b")?;
    create_branch(&repo, "c")?;

    let store = RefStore::new()?;
    store.set_trunk("main")?;
    store.set_parent("a", "main")?;
    store.set_parent("b", "a")?;
    store.set_parent("c", "b")?;

    let ancestors = store.ancestors("c")?;
    assert_eq!(ancestors, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn test_descendants_bfs_parents_first() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    for b in ["a", "b", "c", "d"] {
        create_branch(&repo, b)?;
    }

    let store = RefStore::new()?;
    store.set_trunk("main")?;
    store.set_parent("a", "main")?;
    store.set_parent("b", "a")?;
    store.set_parent("c", "a")?;
    store.set_parent("d", "b")?;

    let desc = store.descendants("a")?;
    // b and c (depth 1) before d (depth 2)
    let pos = |x: &str| desc.iter().position(|s| s == x).unwrap();
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));
    assert_eq!(desc.len(), 3);
    Ok(())
}

#[test]
fn test_topological_sort_parents_first() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    for b in ["a", "b", "c"] {
        create_branch(&repo, b)?;
    }

    let store = RefStore::new()?;
    store.set_trunk("main")?;
    store.set_parent("a", "main")?;
    store.set_parent("b", "a")?;
    store.set_parent("c", "b")?;

    let sorted = store.topological_sort(&["c".to_string(), "a".to_string(), "b".to_string()])?;
    assert_eq!(sorted, vec!["a", "b", "c"]);
    Ok(())
}

#[test]
fn test_effective_scope_inherits() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    for b in ["a", "b", "c"] {
        create_branch(&repo, b)?;
    }

    let store = RefStore::new()?;
    store.set_trunk("main")?;
    store.register_branch("a", Some("main"), Some("TCK-1"))?;
    store.register_branch("b", Some("a"), None)?;
    store.register_branch("c", Some("b"), Some("TCK-2"))?;

    assert_eq!(store.effective_scope("a")?.as_deref(), Some("TCK-1"));
    assert_eq!(store.effective_scope("b")?.as_deref(), Some("TCK-1"));
    assert_eq!(store.effective_scope("c")?.as_deref(), Some("TCK-2"));
    Ok(())
}

#[test]
fn test_pr_record_persists() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_test_repo(dir.path())?;
    let _ctx = TestRepoContext::new(dir.path());
    create_branch(&repo, "feature")?;

    let store = RefStore::new()?;
    store.set_parent("feature", "main")?;
    store.update_metadata("feature", |meta| {
        meta.pr = Some(PrRecord {
            number: Some(42),
            base: "main".to_string(),
            url: "https://example.com/pull/42".to_string(),
            title: "Feature".to_string(),
            body: String::new(),
            state: PrState::Open,
            draft: true,
        });
    })?;

    let pr = store.read_metadata("feature")?.unwrap().pr.unwrap();
    assert_eq!(pr.number, Some(42));
    assert!(pr.draft);
    Ok(())
}
