//! Absorb behavior end to end: hunk routing, scope bounds, dry runs.

mod common;

use anyhow::Result;
use common::*;
use tempfile::tempdir;

/// main → a (adds lines.txt) → b (adds other.txt), HEAD on b
fn build_absorb_stack(dir: &std::path::Path) -> Result<()> {
    create_tracked_branch(dir, "a", "main")?;
    commit_file(dir, "lines.txt", "one\ntwo\nthree\n", "add lines")?;

    create_tracked_branch(dir, "b", "a")?;
    commit_file(dir, "other.txt", "other\n", "add other")?;
    Ok(())
}

#[test]
fn test_absorb_routes_hunk_to_owning_commit() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    build_absorb_stack(dir.path())?;

    // Edit a line introduced by a's commit, staged from b
    std::fs::write(dir.path().join("lines.txt"), "one\nTWO\nthree\n")?;
    run_git(dir.path(), &["add", "lines.txt"])?;

    st_ok(dir.path(), &["absorb"]);

    // a's commit now carries the change, b is restacked, and the tree is
    // clean for the absorbed hunk
    let blob = git_ok(dir.path(), &["show", "a:lines.txt"]);
    assert_eq!(blob, "one\nTWO\nthree");
    assert_eq!(merge_base(dir.path(), "b", "a"), branch_sha(dir.path(), "a"));
    assert_eq!(git_ok(dir.path(), &["status", "--porcelain"]), "");
    // a still has exactly one commit of its own
    assert_eq!(git_ok(dir.path(), &["rev-list", "--count", "main..a"]), "1");
    Ok(())
}

#[test]
fn test_absorb_dry_run_reports_without_mutating() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    build_absorb_stack(dir.path())?;

    std::fs::write(dir.path().join("lines.txt"), "one\nTWO\nthree\n")?;
    run_git(dir.path(), &["add", "lines.txt"])?;

    let a_tip = branch_sha(dir.path(), "a");
    let output = st_ok(dir.path(), &["--dry-run", "absorb"]);
    assert!(output.contains("add lines"), "output: {}", output);
    assert!(output.contains("No changes made"), "output: {}", output);

    // Nothing moved; the staged change is still staged
    assert_eq!(branch_sha(dir.path(), "a"), a_tip);
    let status = git_ok(dir.path(), &["status", "--porcelain"]);
    assert!(status.contains("lines.txt"), "status: {}", status);
    Ok(())
}

#[test]
fn test_absorb_scope_boundary_leaves_hunk_unabsorbed() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;

    // a carries scope X; b carries scope Y. From b, a's commits are out of
    // reach for absorb.
    run_git(dir.path(), &["checkout", "-b", "a"])?;
    st_ok(dir.path(), &["track", "a", "--scope", "X"]);
    commit_file(dir.path(), "lines.txt", "one\ntwo\nthree\n", "add lines")?;

    run_git(dir.path(), &["checkout", "-b", "b"])?;
    st_ok(dir.path(), &["track", "b", "--parent", "a", "--scope", "Y"]);
    commit_file(dir.path(), "other.txt", "other\n", "add other")?;

    std::fs::write(dir.path().join("lines.txt"), "one\nTWO\nthree\n")?;
    run_git(dir.path(), &["add", "lines.txt"])?;

    let a_tip = branch_sha(dir.path(), "a");
    let output = st_ok(dir.path(), &["absorb"]);
    assert!(output.contains("No commit"), "output: {}", output);
    assert_eq!(branch_sha(dir.path(), "a"), a_tip);
    Ok(())
}

#[test]
fn test_absorb_within_scope_targets_scoped_ancestor() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;

    // main → a[X] → b[X] → c (no scope). A hunk over a's commit staged on
    // b absorbs into a; c above gets restacked.
    run_git(dir.path(), &["checkout", "-b", "a"])?;
    st_ok(dir.path(), &["track", "a", "--scope", "X"]);
    commit_file(dir.path(), "lines.txt", "one\ntwo\nthree\n", "add lines")?;

    run_git(dir.path(), &["checkout", "-b", "b"])?;
    st_ok(dir.path(), &["track", "b", "--parent", "a", "--scope", "X"]);
    commit_file(dir.path(), "b.txt", "b\n", "commit b")?;

    create_tracked_branch(dir.path(), "c", "b")?;
    commit_file(dir.path(), "c.txt", "c\n", "commit c")?;

    run_git(dir.path(), &["checkout", "b"])?;
    std::fs::write(dir.path().join("lines.txt"), "one\nTWO\nthree\n")?;
    run_git(dir.path(), &["add", "lines.txt"])?;

    st_ok(dir.path(), &["absorb"]);

    let blob = git_ok(dir.path(), &["show", "a:lines.txt"]);
    assert_eq!(blob, "one\nTWO\nthree");
    // The whole chain above a is aligned again
    assert_eq!(merge_base(dir.path(), "b", "a"), branch_sha(dir.path(), "a"));
    assert_eq!(merge_base(dir.path(), "c", "b"), branch_sha(dir.path(), "b"));
    Ok(())
}

#[test]
fn test_absorb_nothing_staged_is_a_noop() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    build_absorb_stack(dir.path())?;

    let output = st_ok(dir.path(), &["absorb"]);
    assert!(output.contains("No staged changes"), "output: {}", output);
    Ok(())
}

#[test]
fn test_absorb_restores_unabsorbable_changes() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    build_absorb_stack(dir.path())?;

    // One absorbable hunk and one brand-new file nothing owns
    std::fs::write(dir.path().join("lines.txt"), "one\nTWO\nthree\n")?;
    std::fs::write(dir.path().join("new.txt"), "new\n")?;
    run_git(dir.path(), &["add", "."])?;

    st_ok(dir.path(), &["absorb"]);

    // The absorbed hunk is in history; the unabsorbable file came back
    let blob = git_ok(dir.path(), &["show", "a:lines.txt"]);
    assert_eq!(blob, "one\nTWO\nthree");
    assert!(dir.path().join("new.txt").exists());
    Ok(())
}
