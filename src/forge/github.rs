//! GitHub forge implementation backed by the `gh` CLI.
//!
//! Driving `gh` keeps authentication, enterprise hosts, and API versioning
//! out of this codebase; `gh` already handles all three.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::process::Command;

use crate::context::ExecutionContext;

use super::types::{CheckDetail, CheckState, ChecksStatus, MergeMethod, PrRecord, PrState, PrUpdate};
use super::Forge;

pub struct GitHubForge;

impl GitHubForge {
    pub fn new() -> Self {
        Self
    }

    fn run_gh(&self, args: &[&str]) -> Result<String> {
        if ExecutionContext::is_verbose() {
            use colored::Colorize;
            eprintln!("  {} gh {}", "[cmd]".dimmed(), args.join(" "));
        }

        let output = Command::new("gh")
            .args(args)
            .output()
            .context("Failed to run 'gh'. Is the GitHub CLI installed?")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("gh {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPr {
    number: u64,
    url: String,
    title: String,
    #[serde(default)]
    body: String,
    state: String,
    base_ref_name: String,
    #[serde(default)]
    is_draft: bool,
}

impl GhPr {
    fn into_record(self) -> PrRecord {
        let state = match self.state.as_str() {
            "MERGED" => PrState::Merged,
            "CLOSED" => PrState::Closed,
            _ => PrState::Open,
        };
        PrRecord {
            number: Some(self.number),
            base: self.base_ref_name,
            url: self.url,
            title: self.title,
            body: self.body,
            state,
            draft: self.is_draft,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhCheck {
    name: String,
    state: String,
    #[serde(default)]
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Deserialize)]
struct GhRepoView {
    owner: GhOwner,
    name: String,
}

#[derive(Deserialize)]
struct GhOwner {
    login: String,
}

impl Forge for GitHubForge {
    fn check_auth(&self) -> Result<()> {
        let output = Command::new("gh")
            .args(["auth", "status"])
            .output()
            .context("Failed to run 'gh'. Is the GitHub CLI installed?")?;
        if !output.status.success() {
            bail!("GitHub CLI is not authenticated. Run 'gh auth login' first.");
        }
        Ok(())
    }

    fn owner_repo(&self) -> Result<(String, String)> {
        let json = self.run_gh(&["repo", "view", "--json", "owner,name"])?;
        let view: GhRepoView = serde_json::from_str(&json).context("Failed to parse 'gh repo view' output")?;
        Ok((view.owner.login, view.name))
    }

    fn pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>> {
        let json = self.run_gh(&[
            "pr",
            "list",
            "--head",
            branch,
            "--state",
            "all",
            "--limit",
            "1",
            "--json",
            "number,url,title,body,state,baseRefName,isDraft",
        ])?;

        let mut prs: Vec<GhPr> = serde_json::from_str(&json).context("Failed to parse 'gh pr list' output")?;
        Ok(prs.pop().map(GhPr::into_record))
    }

    fn create_pr(&self, branch: &str, base: &str, title: &str, body: &str, draft: bool) -> Result<PrRecord> {
        let mut args = vec![
            "pr", "create", "--head", branch, "--base", base, "--title", title, "--body", body,
        ];
        if draft {
            args.push("--draft");
        }
        self.run_gh(&args)?;

        self.pr_for_branch(branch)?
            .context(format!("PR for '{}' not visible after creation", branch))
    }

    fn update_pr(&self, number: u64, update: &PrUpdate) -> Result<()> {
        let number_str = number.to_string();

        let mut edit_args: Vec<String> = Vec::new();
        if let Some(title) = &update.title {
            edit_args.push("--title".to_string());
            edit_args.push(title.clone());
        }
        if let Some(body) = &update.body {
            edit_args.push("--body".to_string());
            edit_args.push(body.clone());
        }
        if let Some(base) = &update.base {
            edit_args.push("--base".to_string());
            edit_args.push(base.clone());
        }
        for reviewer in &update.reviewers {
            edit_args.push("--add-reviewer".to_string());
            edit_args.push(reviewer.trim_start_matches('@').to_string());
        }

        if !edit_args.is_empty() {
            let mut args: Vec<&str> = vec!["pr", "edit", &number_str];
            args.extend(edit_args.iter().map(|s| s.as_str()));
            self.run_gh(&args)?;
        }

        // Draft state is a separate mutation on GitHub, not a field edit
        match update.draft {
            Some(false) => {
                self.run_gh(&["pr", "ready", &number_str])?;
            }
            Some(true) => {
                self.run_gh(&["pr", "ready", "--undo", &number_str])?;
            }
            None => {}
        }

        Ok(())
    }

    fn merge_pr(&self, number: u64, method: MergeMethod) -> Result<()> {
        let number_str = number.to_string();
        let method_flag = match method {
            MergeMethod::Merge => "--merge",
            MergeMethod::Squash => "--squash",
            MergeMethod::Rebase => "--rebase",
        };
        self.run_gh(&["pr", "merge", &number_str, method_flag])?;
        Ok(())
    }

    fn checks_status(&self, branch: &str) -> Result<ChecksStatus> {
        // `gh pr checks` exits nonzero when checks fail or are pending, so
        // run it raw and parse stdout regardless of exit status.
        if ExecutionContext::is_verbose() {
            use colored::Colorize;
            eprintln!("  {} gh pr checks {} --json ...", "[cmd]".dimmed(), branch);
        }
        let output = Command::new("gh")
            .args([
                "pr",
                "checks",
                branch,
                "--json",
                "name,state,startedAt,completedAt",
            ])
            .output()
            .context("Failed to run 'gh pr checks'")?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            // No checks configured
            return Ok(ChecksStatus {
                passing: true,
                pending: false,
                checks: Vec::new(),
            });
        }

        let raw: Vec<GhCheck> = serde_json::from_str(stdout).context("Failed to parse 'gh pr checks' output")?;

        let checks: Vec<CheckDetail> = raw
            .into_iter()
            .map(|c| {
                let status = match c.state.as_str() {
                    "SUCCESS" | "SKIPPED" | "NEUTRAL" => CheckState::Passing,
                    "IN_PROGRESS" | "QUEUED" | "PENDING" | "WAITING" | "REQUESTED" => CheckState::Pending,
                    _ => CheckState::Failing,
                };
                CheckDetail {
                    name: c.name,
                    status,
                    started_at: c.started_at,
                    finished_at: c.completed_at,
                }
            })
            .collect();

        let pending = checks.iter().any(|c| c.status == CheckState::Pending);
        let passing = !pending && checks.iter().all(|c| c.status == CheckState::Passing);

        Ok(ChecksStatus {
            passing,
            pending,
            checks,
        })
    }
}
