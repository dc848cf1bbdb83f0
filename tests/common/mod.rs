//! Shared harness for integration tests: real git repositories in temp
//! directories, driven through the built `st` binary.

#![allow(dead_code)]

use anyhow::Result;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

/// Run the st binary in a directory
pub fn run_st(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new(env!("CARGO_BIN_EXE_st"))
        .args(args)
        .current_dir(dir)
        .env("GIT_EDITOR", "true")
        .env("GIT_SEQUENCE_EDITOR", "true")
        .output()?)
}

/// Run st and require success, returning stdout
pub fn st_ok(dir: &Path, args: &[&str]) -> String {
    let output = run_st(dir, args).expect("failed to spawn st");
    assert!(
        output.status.success(),
        "st {:?} failed:\nstdout: {}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Run a git command in a directory
pub fn run_git(dir: &Path, args: &[&str]) -> Result<Output> {
    Ok(Command::new("git").args(args).current_dir(dir).output()?)
}

/// Run git and require success, returning trimmed stdout
pub fn git_ok(dir: &Path, args: &[&str]) -> String {
    let output = run_git(dir, args).expect("failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a git repository with an initial commit on main, plus
/// `st init`.
pub fn init_test_repo(dir: &Path) -> Result<()> {
    run_git(dir, &["init", "-b", "main"])?;
    run_git(dir, &["config", "user.name", "Test User"])?;
    run_git(dir, &["config", "user.email", "test@example.com"])?;
    run_git(dir, &["config", "core.editor", "true"])?;
    run_git(dir, &["config", "sequence.editor", "true"])?;

    fs::write(dir.join("README.md"), "# Test Repo\n")?;
    run_git(dir, &["add", "."])?;
    run_git(dir, &["commit", "-m", "Initial commit"])?;

    let output = run_st(dir, &["init"])?;
    assert!(
        output.status.success(),
        "st init failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Write a file, stage it, and commit on the current branch
pub fn commit_file(dir: &Path, file: &str, content: &str, message: &str) -> Result<()> {
    if let Some(parent) = Path::new(file).parent() {
        fs::create_dir_all(dir.join(parent))?;
    }
    fs::write(dir.join(file), content)?;
    run_git(dir, &["add", file])?;
    let output = run_git(dir, &["commit", "-m", message])?;
    assert!(
        output.status.success(),
        "commit failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Create a branch at the current HEAD, check it out, and track it
pub fn create_tracked_branch(dir: &Path, name: &str, parent: &str) -> Result<()> {
    run_git(dir, &["checkout", "-b", name])?;
    let output = run_st(dir, &["track", name, "--parent", parent])?;
    assert!(
        output.status.success(),
        "st track {} failed: {}",
        name,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(())
}

/// Tip SHA of a branch
pub fn branch_sha(dir: &Path, branch: &str) -> String {
    git_ok(dir, &["rev-parse", branch])
}

/// Merge base of two refs
pub fn merge_base(dir: &Path, a: &str, b: &str) -> String {
    git_ok(dir, &["merge-base", a, b])
}

/// The recorded parent of a tracked branch, read from the metadata ref
pub fn recorded_parent(dir: &Path, branch: &str) -> Option<String> {
    let refname = format!("refs/strata/meta/{}", branch);
    let output = run_git(dir, &["cat-file", "blob", &refname]).ok()?;
    if !output.status.success() {
        return None;
    }
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    payload["parent"].as_str().map(String::from)
}

/// Whether `ancestor` is an ancestor of `descendant`
pub fn is_ancestor(dir: &Path, ancestor: &str, descendant: &str) -> bool {
    run_git(dir, &["merge-base", "--is-ancestor", ancestor, descendant])
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Build the classic linear stack: main → a → b → c, one file per branch.
/// Leaves HEAD on c.
pub fn build_linear_stack(dir: &Path) -> Result<()> {
    create_tracked_branch(dir, "a", "main")?;
    commit_file(dir, "a.txt", "a\n", "commit a")?;

    create_tracked_branch(dir, "b", "a")?;
    commit_file(dir, "b.txt", "b\n", "commit b")?;

    create_tracked_branch(dir, "c", "b")?;
    commit_file(dir, "c.txt", "c\n", "commit c")?;
    Ok(())
}
