//! Unified-diff parsing for GitGateway.
//!
//! Diffs are requested with zero context lines (-U0) so each hunk's header
//! names exactly the lines it removes and adds; that is what the absorb
//! commutation test needs.

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

use super::GitGateway;

/// One hunk of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// Path of the file the hunk applies to (new-side path)
    pub path: String,
    /// First line of the removed range (1-based; 0 for pure insertions)
    pub old_start: u32,
    /// Number of removed lines
    pub old_count: u32,
    /// First line of the added range (1-based; 0 for pure deletions)
    pub new_start: u32,
    /// Number of added lines
    pub new_count: u32,
    /// The hunk body: context/`-`/`+` lines, without the @@ header
    pub body: String,
}

impl Hunk {
    /// The old-side line range `[start, end)` this hunk removes or anchors to.
    ///
    /// A pure insertion (old_count == 0) still anchors at old_start; it is
    /// treated as a zero-width range just after that line.
    pub fn old_range(&self) -> (u32, u32) {
        (self.old_start, self.old_start + self.old_count)
    }

    /// The new-side line range `[start, end)` this hunk adds.
    pub fn new_range(&self) -> (u32, u32) {
        (self.new_start, self.new_start + self.new_count)
    }

    /// Whether two half-open line ranges overlap.
    ///
    /// Zero-width ranges (pure insertions/deletions) overlap a range when
    /// they fall strictly inside it.
    pub fn ranges_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
        let (a_start, a_end) = a;
        let (b_start, b_end) = b;

        if a_start == a_end {
            return a_start > b_start && a_start < b_end;
        }
        if b_start == b_end {
            return b_start > a_start && b_start < a_end;
        }
        a_start < b_end && b_start < a_end
    }

    /// Render this hunk as an applicable patch for its file
    pub fn to_patch(&self) -> String {
        format!(
            "--- a/{path}\n+++ b/{path}\n@@ -{os},{oc} +{ns},{nc} @@\n{body}",
            path = self.path,
            os = self.old_start,
            oc = self.old_count,
            ns = self.new_start,
            nc = self.new_count,
            body = self.body,
        )
    }
}

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex is valid")
    })
}

/// Parse `git diff` output into hunks.
///
/// Handles multiple files per diff; binary files and mode-only changes
/// produce no hunks.
pub fn parse_unified_diff(text: &str) -> Result<Vec<Hunk>> {
    let re = hunk_header_re();
    let mut hunks = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current: Option<Hunk> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            let path = rest.strip_prefix("b/").unwrap_or(rest);
            current_path = if path == "/dev/null" {
                None
            } else {
                Some(path.to_string())
            };
            continue;
        }
        if line.starts_with("--- ") || line.starts_with("diff --git") || line.starts_with("index ") {
            continue;
        }

        if let Some(caps) = re.captures(line) {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            let path = current_path
                .clone()
                .context("Hunk header before any file header in diff")?;
            let old_start: u32 = caps[1].parse()?;
            let old_count: u32 = caps.get(2).map(|m| m.as_str().parse()).transpose()?.unwrap_or(1);
            let new_start: u32 = caps[3].parse()?;
            let new_count: u32 = caps.get(4).map(|m| m.as_str().parse()).transpose()?.unwrap_or(1);

            current = Some(Hunk {
                path,
                old_start,
                old_count,
                new_start,
                new_count,
                body: String::new(),
            });
            continue;
        }

        if let Some(h) = current.as_mut() {
            if line.starts_with('+') || line.starts_with('-') || line.starts_with(' ') || line == r"\ No newline at end of file" {
                h.body.push_str(line);
                h.body.push('\n');
            }
        }
    }

    if let Some(h) = current.take() {
        hunks.push(h);
    }

    Ok(hunks)
}

impl GitGateway {
    /// Parse the staged changes into hunks (zero-context diff)
    pub fn staged_hunks(&self) -> Result<Vec<Hunk>> {
        let output = self.run_git(&["diff", "--cached", "--unified=0", "--no-color"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git diff --cached failed: {}", stderr.trim());
        }
        parse_unified_diff(&String::from_utf8_lossy(&output.stdout))
    }

    /// Hunks a commit introduced for one file (zero-context diff)
    pub fn commit_hunks(&self, commit: &str, path: &str) -> Result<Vec<Hunk>> {
        let range = format!("{}^!", commit);
        let output = self.run_git(&["diff", "--unified=0", "--no-color", &range, "--", path])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git diff {} failed: {}", range, stderr.trim());
        }
        parse_unified_diff(&String::from_utf8_lossy(&output.stdout))
    }
}
