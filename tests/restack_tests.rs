//! Restack behavior end to end: linear repair, conflict checkpointing and
//! resumption, fast-forward and squashed-merge detection.

mod common;

use anyhow::Result;
use common::*;
use tempfile::tempdir;

#[test]
fn test_linear_restack_carries_trunk_commit_transitively() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    build_linear_stack(dir.path())?;

    // Trunk advances
    run_git(dir.path(), &["checkout", "main"])?;
    commit_file(dir.path(), "m.txt", "m\n", "commit m")?;

    st_ok(dir.path(), &["restack", "-b", "a"]);

    // Each branch sits exactly on its parent's tip
    assert_eq!(merge_base(dir.path(), "a", "main"), branch_sha(dir.path(), "main"));
    assert_eq!(merge_base(dir.path(), "b", "a"), branch_sha(dir.path(), "a"));
    assert_eq!(merge_base(dir.path(), "c", "b"), branch_sha(dir.path(), "b"));
    // And trunk's commit reached the top transitively
    assert!(is_ancestor(dir.path(), "main", "c"));
    Ok(())
}

#[test]
fn test_restack_twice_is_stable() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    build_linear_stack(dir.path())?;

    run_git(dir.path(), &["checkout", "main"])?;
    commit_file(dir.path(), "m.txt", "m\n", "commit m")?;

    st_ok(dir.path(), &["restack", "-b", "a"]);
    let tips: Vec<String> = ["a", "b", "c"].iter().map(|b| branch_sha(dir.path(), b)).collect();

    // Second run finds nothing to do and moves no refs
    let output = st_ok(dir.path(), &["restack", "-b", "a"]);
    assert!(output.contains("already in place"), "output: {}", output);
    for (i, branch) in ["a", "b", "c"].iter().enumerate() {
        assert_eq!(branch_sha(dir.path(), branch), tips[i]);
    }
    Ok(())
}

#[test]
fn test_middle_conflict_checkpoints_and_continues() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;

    // Stack where b edits a line trunk will also edit
    commit_file(dir.path(), "shared.txt", "base\n", "add shared")?;

    create_tracked_branch(dir.path(), "a", "main")?;
    commit_file(dir.path(), "a.txt", "a\n", "commit a")?;

    create_tracked_branch(dir.path(), "b", "a")?;
    commit_file(dir.path(), "shared.txt", "b version\n", "b edits shared")?;

    create_tracked_branch(dir.path(), "c", "b")?;
    commit_file(dir.path(), "c.txt", "c\n", "commit c")?;

    run_git(dir.path(), &["checkout", "main"])?;
    commit_file(dir.path(), "shared.txt", "main version\n", "main edits shared")?;

    let c_tip_before = branch_sha(dir.path(), "c");

    // a restacks, b conflicts; dedicated exit code, c untouched
    let output = run_st(dir.path(), &["restack", "-b", "a"])?;
    assert_eq!(output.status.code(), Some(3), "expected conflict exit code");
    assert_eq!(branch_sha(dir.path(), "c"), c_tip_before);
    assert_eq!(merge_base(dir.path(), "a", "main"), branch_sha(dir.path(), "main"));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("continue"), "stdout: {}", stdout);

    // A second mutating command is refused while the conflict is pending
    let blocked = run_st(dir.path(), &["restack"])?;
    assert!(!blocked.status.success());

    // Resolve and continue: b then c complete
    std::fs::write(dir.path().join("shared.txt"), "merged version\n")?;
    run_git(dir.path(), &["add", "shared.txt"])?;
    st_ok(dir.path(), &["continue"]);

    assert_eq!(merge_base(dir.path(), "b", "a"), branch_sha(dir.path(), "a"));
    assert_eq!(merge_base(dir.path(), "c", "b"), branch_sha(dir.path(), "b"));
    assert!(is_ancestor(dir.path(), "main", "c"));
    Ok(())
}

#[test]
fn test_conflict_abort_rolls_back_to_snapshot() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;

    commit_file(dir.path(), "shared.txt", "base\n", "add shared")?;

    create_tracked_branch(dir.path(), "a", "main")?;
    commit_file(dir.path(), "shared.txt", "a version\n", "a edits shared")?;

    run_git(dir.path(), &["checkout", "main"])?;
    commit_file(dir.path(), "shared.txt", "main version\n", "main edits shared")?;

    let a_tip_before = branch_sha(dir.path(), "a");

    let output = run_st(dir.path(), &["restack", "-b", "a"])?;
    assert_eq!(output.status.code(), Some(3));

    st_ok(dir.path(), &["abort"]);

    // The branch is back where it was and no rebase is pending
    assert_eq!(branch_sha(dir.path(), "a"), a_tip_before);
    assert!(!dir.path().join(".git").join("rebase-merge").exists());
    Ok(())
}

#[test]
fn test_branch_with_no_own_commits_fast_forwards() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;

    create_tracked_branch(dir.path(), "a", "main")?;
    commit_file(dir.path(), "a.txt", "a\n", "commit a")?;

    // b tracks a but never commits anything of its own
    create_tracked_branch(dir.path(), "b", "a")?;

    // a gains another commit
    run_git(dir.path(), &["checkout", "a"])?;
    commit_file(dir.path(), "a2.txt", "a2\n", "commit a2")?;

    st_ok(dir.path(), &["restack", "-b", "b", "--only"]);
    assert_eq!(branch_sha(dir.path(), "b"), branch_sha(dir.path(), "a"));

    // The pointer move was recorded on the branch's metadata
    let payload = git_ok(dir.path(), &["cat-file", "blob", "refs/strata/meta/b"]);
    let meta: serde_json::Value = serde_json::from_str(&payload)?;
    assert_eq!(meta["fast_forward_fixed"], serde_json::Value::Bool(true));
    Ok(())
}

#[test]
fn test_squashed_merge_detected_and_branch_reparented_without_rebase() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;

    create_tracked_branch(dir.path(), "a", "main")?;
    commit_file(dir.path(), "a.txt", "feature work\n", "feature work")?;

    // The identical change lands on trunk as a different commit, the way a
    // remote squash-and-merge would
    run_git(dir.path(), &["checkout", "main"])?;
    commit_file(dir.path(), "a.txt", "feature work\n", "squashed: feature work")?;

    st_ok(dir.path(), &["restack", "-b", "a", "--only"]);

    // Pointer move, no rebased copy of the commit
    assert_eq!(branch_sha(dir.path(), "a"), branch_sha(dir.path(), "main"));
    let payload = git_ok(dir.path(), &["cat-file", "blob", "refs/strata/meta/a"]);
    let meta: serde_json::Value = serde_json::from_str(&payload)?;
    assert_eq!(meta["squashed_merge_fixed"], serde_json::Value::Bool(true));
    Ok(())
}

#[test]
fn test_restack_on_trunk_rejected() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;

    let output = run_st(dir.path(), &["restack", "-b", "main", "--only"])?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("trunk"), "stderr: {}", stderr);
    Ok(())
}

#[test]
fn test_restack_refused_with_dirty_tree() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    build_linear_stack(dir.path())?;

    std::fs::write(dir.path().join("a.txt"), "dirty\n")?;

    let output = run_st(dir.path(), &["restack"])?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("uncommitted"), "stderr: {}", stderr);
    Ok(())
}
