//! Subprocess-based implementation of GitBackend.
//!
//! Uses git CLI commands for every operation. Works on any repository
//! format, including reftable. Each operation spawns a git subprocess, so
//! this backend trades latency for compatibility.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{GitBackend, Oid, RefFormat};

/// Subprocess-based backend implementation
pub struct SubprocessBackend {
    git_dir: PathBuf,
    workdir: PathBuf,
    ref_format: RefFormat,
}

impl SubprocessBackend {
    /// Open a repository at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(path)
            .output()
            .context("Failed to find git directory")?;

        if !output.status.success() {
            anyhow::bail!("Not a git repository");
        }

        let git_dir_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let git_dir = if Path::new(&git_dir_str).is_absolute() {
            PathBuf::from(git_dir_str)
        } else {
            path.join(git_dir_str)
        };

        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()
            .context("Failed to find working directory")?;

        if !output.status.success() {
            anyhow::bail!("Not a working tree");
        }

        let workdir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let ref_format = super::detect_ref_format(path)?;

        Ok(Self {
            git_dir,
            workdir,
            ref_format,
        })
    }

    fn run_git(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .context(format!("Failed to run git {}", args.join(" ")))
    }

    fn run_git_success(&self, args: &[&str]) -> Result<()> {
        let output = self.run_git(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(())
    }

    fn run_git_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.run_git(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitBackend for SubprocessBackend {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn ref_format(&self) -> RefFormat {
        self.ref_format
    }

    fn refresh(&self) -> Result<()> {
        // Every operation spawns a fresh subprocess; nothing is cached.
        Ok(())
    }

    fn get_current_branch(&self) -> Result<String> {
        self.run_git_stdout(&["symbolic-ref", "--short", "HEAD"])
            .context("Failed to get current branch (HEAD may be detached)")
    }

    fn is_on_branch(&self) -> Result<bool> {
        let output = self.run_git(&["symbolic-ref", "--short", "HEAD"])?;
        Ok(output.status.success())
    }

    fn create_branch_at(&self, name: &str, at_ref: &str) -> Result<()> {
        self.run_git_success(&["branch", name, at_ref])
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{}", name);
        let output = self.run_git(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    fn checkout_branch(&self, name: &str) -> Result<()> {
        self.run_git_success(&["checkout", name])
    }

    fn list_branches(&self) -> Result<Vec<String>> {
        let stdout = self.run_git_stdout(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])?;
        let mut branches: Vec<String> = stdout.lines().map(|l| l.trim().to_string()).collect();
        branches.sort();
        Ok(branches)
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        self.run_git_success(&["branch", "-D", name])
    }

    fn stage_all(&self) -> Result<()> {
        self.run_git_success(&["add", "-A"])
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.run_git_success(&["commit", "-m", message])
    }

    fn amend_commit(&self, message: Option<&str>) -> Result<()> {
        match message {
            Some(msg) => self.run_git_success(&["commit", "--amend", "-m", msg]),
            None => self.run_git_success(&["commit", "--amend", "--no-edit"]),
        }
    }

    fn create_reference(&self, name: &str, target: &Oid, _force: bool, _msg: &str) -> Result<()> {
        // update-ref overwrites by default
        self.run_git_success(&["update-ref", name, target.as_str()])
    }

    fn delete_reference(&self, name: &str) -> Result<()> {
        let output = self.run_git(&["update-ref", "-d", name])?;
        // Deleting a missing ref is a no-op
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("unable to del") && !stderr.contains("not exist") {
                anyhow::bail!("git update-ref -d {} failed: {}", name, stderr.trim());
            }
        }
        Ok(())
    }

    fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        let output = self.run_git(&["rev-parse", "--verify", "--quiet", name])?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(Oid::from_str_unchecked(&sha)))
    }

    fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        // for-each-ref takes a prefix, not a glob; strip a trailing "*"
        let prefix = pattern.trim_end_matches('*');
        let stdout = self.run_git_stdout(&["for-each-ref", "--format=%(refname) %(objectname)", prefix])?;

        let mut refs = Vec::new();
        for line in stdout.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(name), Some(oid)) = (parts.next(), parts.next()) {
                refs.push((name.to_string(), Oid::from_str_unchecked(oid)));
            }
        }

        refs.sort();
        Ok(refs)
    }

    fn create_blob(&self, content: &[u8]) -> Result<Oid> {
        let mut child = Command::new("git")
            .args(["hash-object", "-w", "--stdin"])
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to run git hash-object")?;

        child
            .stdin
            .take()
            .context("Failed to open stdin for git hash-object")?
            .write_all(content)?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git hash-object failed: {}", stderr.trim());
        }

        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Oid::from_str_unchecked(&sha))
    }

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        let output = self.run_git(&["cat-file", "blob", oid.as_str()])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git cat-file failed: {}", stderr.trim());
        }
        Ok(output.stdout)
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        let stdout = self.run_git_stdout(&["status", "--porcelain"])?;
        Ok(!stdout.is_empty())
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let output = self.run_git(&["diff", "--cached", "--quiet"])?;
        Ok(!output.status.success())
    }

    fn has_staged_or_modified_changes(&self) -> Result<bool> {
        let stdout = self.run_git_stdout(&["status", "--porcelain"])?;
        // Untracked files ("??") don't block rebase
        Ok(stdout.lines().any(|l| !l.starts_with("??")))
    }

    fn get_merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        let sha = self
            .run_git_stdout(&["merge-base", a, b])
            .context(format!("No merge base between '{}' and '{}'", a, b))?;
        Ok(Oid::from_str_unchecked(&sha))
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.run_git(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        Ok(output.status.success())
    }

    fn get_ref_sha(&self, reference: &str) -> Result<Oid> {
        let sha = self.run_git_stdout(&["rev-parse", reference])?;
        Ok(Oid::from_str_unchecked(&sha))
    }

    fn get_commit_subject(&self, reference: &str) -> Result<String> {
        self.run_git_stdout(&["log", "-1", "--format=%s", reference])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_test_repo};
    use tempfile::tempdir;

    #[test]
    fn test_open_subprocess_backend() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;

        let backend = SubprocessBackend::open(dir.path())?;
        assert_eq!(backend.get_current_branch()?, "main");
        Ok(())
    }

    #[test]
    fn test_refs_and_blobs() -> Result<()> {
        let dir = tempdir()?;
        init_test_repo(dir.path())?;

        let backend = SubprocessBackend::open(dir.path())?;
        let blob = backend.create_blob(b"{\"parent\":\"main\"}")?;
        assert_eq!(backend.read_blob(&blob)?, b"{\"parent\":\"main\"}");

        backend.create_reference("refs/strata/meta/x", &blob, true, "test")?;
        assert_eq!(backend.find_reference("refs/strata/meta/x")?, Some(blob));

        backend.delete_reference("refs/strata/meta/x")?;
        assert!(backend.find_reference("refs/strata/meta/x")?.is_none());
        Ok(())
    }

    #[test]
    fn test_status_detection() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;

        let backend = SubprocessBackend::open(dir.path())?;
        assert!(!backend.has_uncommitted_changes()?);

        std::fs::write(dir.path().join("x.txt"), "x\n")?;
        assert!(backend.has_uncommitted_changes()?);
        // Untracked only: does not count as staged-or-modified
        assert!(!backend.has_staged_or_modified_changes()?);

        commit_file(&repo, "x.txt", "x\n", "add x")?;
        assert!(!backend.has_uncommitted_changes()?);
        Ok(())
    }
}
