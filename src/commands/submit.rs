use anyhow::{Context, Result};
use colored::Colorize;
use futures::stream::{self, StreamExt};

use crate::engine::StackEngine;
use crate::forge::{self, PrRecord, PrState, PrUpdate};
use crate::git_gateway::GitGateway;
use crate::state::acquire_operation_lock;
use crate::validation;

/// Bound on concurrent push+PR workers. Each worker opens its own gateway
/// and forge handle; workers touch distinct refs and distinct PRs, so
/// they commute.
const SUBMIT_CONCURRENCY: usize = 4;

/// Push the stack's branches and create or update their PRs.
pub async fn run(stack: bool, draft: bool, no_open: bool) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;

    let current = validation::require_on_branch(&engine.gateway)?;
    validation::require_not_trunk(&current, &engine.trunk)?;
    validation::require_tracked(&engine.store, &current)?;

    let mut branches = engine.store.ancestors(&current)?;
    if stack {
        branches.extend(engine.store.descendants(&current)?);
    }

    engine.snapshot_before("submit", &branches)?;

    println!(
        "{} Submitting {} branch{}...",
        "→".blue(),
        branches.len(),
        if branches.len() == 1 { "" } else { "es" }
    );

    // Fan-out 1: fetch existing PR info for every branch concurrently
    let infos = forge::fetch_prs_parallel(branches.clone()).await;

    // Fan-out 2: push + create/update PR per branch, bounded workers with
    // a join barrier. Parent branches must exist on the remote before a
    // child PR can use them as base, so pushes happen first, in the same
    // pass, per worker ordering below.
    let jobs: Vec<SubmitJob> = branches
        .iter()
        .map(|branch| {
            let existing = infos
                .iter()
                .find(|(b, _)| b == branch)
                .and_then(|(_, pr)| pr.clone());
            SubmitJob {
                branch: branch.clone(),
                parent: engine
                    .store
                    .get_parent(branch)
                    .ok()
                    .flatten()
                    .unwrap_or_else(|| engine.trunk.clone()),
                existing,
                draft,
                footer: if engine.config.pr_footer {
                    Some(stack_footer(&branches, branch))
                } else {
                    None
                },
            }
        })
        .collect();

    // Push everything first so every PR base exists remotely
    for job in &jobs {
        engine
            .gateway
            .push_branch(&job.branch, false)
            .with_context(|| format!("Failed to push '{}'", job.branch))?;
        println!("  {} pushed {}", "✓".green(), job.branch.green());
    }

    let results: Vec<(String, Result<PrRecord>)> = stream::iter(jobs.into_iter().map(|job| async move {
        let branch = job.branch.clone();
        let result = tokio::task::spawn_blocking(move || submit_one(job))
            .await
            .map_err(|e| anyhow::anyhow!("submit worker panicked: {}", e))
            .and_then(|r| r);
        (branch, result)
    }))
    .buffered(SUBMIT_CONCURRENCY)
    .collect()
    .await;

    let mut failures = 0;
    let mut urls = Vec::new();
    for (branch, result) in results {
        match result {
            Ok(pr) => {
                let number = pr.number.unwrap_or(0);
                println!(
                    "  {} {} → PR #{} (base {})",
                    "✓".green(),
                    branch.green(),
                    number,
                    pr.base.blue()
                );
                if !pr.url.is_empty() {
                    urls.push(pr.url.clone());
                }
                // Record the PR and the pushed SHA against the branch
                let remote_sha = engine.gateway.get_branch_sha(&branch).ok();
                engine
                    .store
                    .update_metadata(&branch, |m| {
                        m.pr = Some(pr);
                        m.remote_sha = remote_sha;
                    })
                    .ok();
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {} {}: {:#}", "✗".red(), branch.red(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} branch(es) failed to submit", failures);
    }

    if !no_open {
        for url in &urls {
            open::that(url).ok();
        }
    }

    println!("\n{} Submit complete!", "✓".green().bold());
    Ok(())
}

struct SubmitJob {
    branch: String,
    parent: String,
    existing: Option<PrRecord>,
    draft: bool,
    footer: Option<String>,
}

/// One worker: create the PR, or realign an existing open PR's base and
/// body. Runs on a blocking thread with its own forge handle.
fn submit_one(job: SubmitJob) -> Result<PrRecord> {
    let forge = forge::get_forge()?;

    match job.existing {
        Some(pr) if pr.state == PrState::Open => {
            let number = pr.number.context("existing PR has no number")?;
            let mut update = PrUpdate::default();
            if pr.base != job.parent {
                update.base = Some(job.parent.clone());
            }
            if let Some(footer) = &job.footer {
                if !pr.body.contains(footer.trim()) {
                    update.body = Some(format!("{}\n\n{}", pr.body.trim_end(), footer));
                }
            }
            forge.update_pr(number, &update)?;

            let mut updated = pr;
            updated.base = job.parent;
            if let Some(body) = update.body {
                updated.body = body;
            }
            Ok(updated)
        }
        _ => {
            let gateway = GitGateway::new()?;
            let title = gateway.commit_subject(&job.branch)?;
            let body = job.footer.unwrap_or_default();
            forge.create_pr(&job.branch, &job.parent, &title, &body, job.draft)
        }
    }
}

/// The stack footer appended to PR bodies: where this PR sits in its
/// stack, bottom at the bottom.
fn stack_footer(branches: &[String], current: &str) -> String {
    let mut footer = String::from("---\nStack:\n");
    for branch in branches.iter().rev() {
        if branch == current {
            footer.push_str(&format!("- **{}** ← this PR\n", branch));
        } else {
            footer.push_str(&format!("- {}\n", branch));
        }
    }
    footer
}
