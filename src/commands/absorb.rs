use anyhow::Result;
use colored::Colorize;

use crate::absorb::AbsorbEngine;
use crate::context::ExecutionContext;
use crate::engine::StackEngine;
use crate::errors::ConflictPending;
use crate::journal::{Journal, Operation};
use crate::state::acquire_operation_lock;
use crate::validation;

/// Absorb staged changes into the stack commits that depend on them.
pub fn run(all: bool) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;
    let dry_run = ExecutionContext::is_dry_run();

    let current = validation::require_on_branch(&engine.gateway)?;
    validation::require_not_trunk(&current, &engine.trunk)?;
    validation::require_tracked(&engine.store, &current)?;

    if all {
        engine.gateway.stage_all()?;
        println!("{} Staged all changes", "✓".green());
    }

    if !engine.gateway.has_staged_changes()? {
        println!("{} No staged changes to absorb.", "ℹ".blue());
        return Ok(());
    }

    let absorber = AbsorbEngine::new(&engine.gateway, &engine.store, engine.trunk.clone());
    let plan = absorber.plan(&current)?;

    if plan.targets.is_empty() {
        println!(
            "{} No commit in the stack depends on the staged changes ({} hunks left as is).",
            "ℹ".blue(),
            plan.unabsorbable.len()
        );
        return Ok(());
    }

    // Report the grouping, dry-run or not
    println!("{} Absorb targets:", "→".blue());
    for group in plan.groups() {
        for (commit, hunks) in &group.commits {
            let subject = engine.gateway.commit_subject(commit).unwrap_or_default();
            println!(
                "  {} hunk{} → {} {} ({})",
                hunks.len(),
                if hunks.len() == 1 { "" } else { "s" },
                &commit[..7.min(commit.len())],
                subject.dimmed(),
                group.branch.green()
            );
        }
    }
    if !plan.unabsorbable.is_empty() {
        println!(
            "  {} {} hunk{} had no owning commit and will stay staged",
            "!".yellow(),
            plan.unabsorbable.len(),
            if plan.unabsorbable.len() == 1 { "" } else { "s" }
        );
    }

    if dry_run {
        println!("\n{} No changes made (dry-run mode)", "✓".green().bold());
        return Ok(());
    }

    engine.snapshot_before("absorb", &[current.clone()])?;

    let report = absorber.apply(&plan, &current)?;

    Journal::new()?.record(Operation::AbsorbApplied {
        branches: report.modified_branches.clone(),
        hunks: report.absorbed_hunks,
    })?;

    if let Some(conflicted) = report.conflict_branch {
        println!(
            "\n{} Restacking after absorb hit a conflict in '{}'.",
            "✗".red(),
            conflicted.yellow()
        );
        println!("Your uncommitted changes are kept in the stash; after resolving, run:");
        println!("  git stash pop");
        return Err(ConflictPending(conflicted).into());
    }

    println!(
        "\n{} Absorbed {} hunk{} into {} branch{}",
        "✓".green().bold(),
        report.absorbed_hunks,
        if report.absorbed_hunks == 1 { "" } else { "s" },
        report.modified_branches.len(),
        if report.modified_branches.len() == 1 { "" } else { "es" }
    );
    Ok(())
}
