use anyhow::Result;
use colored::Colorize;
use std::collections::BTreeMap;

use crate::engine::StackEngine;
use crate::errors::ConflictPending;
use crate::forge::{self, CiWaitConfig};
use crate::journal::{Journal, Operation};
use crate::merge_exec::{ConsoleReporter, MergeExecutor, MergePlanner, MergeStrategy, PlanContext};
use crate::state::acquire_operation_lock;
use crate::ui;
use crate::validation;

/// Merge the current branch's downstack through the remote.
pub async fn run(strategy: MergeStrategy, force: bool, worktree: bool, yes: bool) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;
    engine.gateway.require_clean_for_rebase()?;

    let current = validation::require_on_branch(&engine.gateway)?;
    validation::require_not_trunk(&current, &engine.trunk)?;
    validation::require_tracked(&engine.store, &current)?;

    // The selection is the downstack chain, oldest first, ending at the
    // current branch
    let selection = engine.store.ancestors(&current)?;

    println!(
        "{} Planning {} merge of {} branch{}...",
        "→".blue(),
        strategy,
        selection.len(),
        if selection.len() == 1 { "" } else { "es" }
    );

    let forge = forge::get_forge()?;
    forge.check_auth()?;

    // Gather the world state the planner validates against
    let infos = forge::fetch_prs_parallel(selection.clone()).await;
    let mut prs = BTreeMap::new();
    let mut checks = BTreeMap::new();
    let mut divergence = BTreeMap::new();
    for (branch, pr) in infos {
        if let Some(pr) = pr {
            if let Ok(status) = forge.checks_status(&branch) {
                checks.insert(branch.clone(), status);
            }
            prs.insert(branch.clone(), pr);
        }
        if let Ok(d) = engine.gateway.remote_divergence(&branch) {
            divergence.insert(branch, d);
        }
    }
    let ctx = PlanContext {
        prs,
        checks,
        divergence,
    };

    let graph = engine.graph()?;
    let planner = MergePlanner::new(&graph);
    let plan = planner.plan(strategy, &selection, &ctx, force)?;

    for warning in &plan.warnings {
        println!("  {} {}", "!".yellow(), warning);
    }
    for notice in &plan.notices {
        println!("  {} {}", "ℹ".blue(), notice);
    }
    println!("\nPlan ({} steps):", plan.steps.len());
    for step in &plan.steps {
        println!("  • {}", step);
    }
    println!();

    if !yes && !ui::confirm("Execute this plan?", false)? {
        println!("Aborted. Nothing was merged.");
        return Ok(());
    }

    engine.snapshot_before("merge", &plan.branches)?;
    Journal::new()?.record(Operation::MergeStarted {
        branches: plan.branches.clone(),
        strategy: strategy.to_string(),
    })?;

    let ci = CiWaitConfig {
        timeout_secs: engine.config.ci_timeout_secs,
        poll_interval_secs: engine.config.ci_poll_interval_secs,
        enabled: true,
    };
    let executor = MergeExecutor::new(
        &engine.gateway,
        &engine.store,
        forge.as_ref(),
        engine.trunk.clone(),
        ci,
    );

    let execution = if worktree {
        executor.execute_in_worktree(&plan, &ConsoleReporter)?
    } else {
        executor.execute(&plan, &ConsoleReporter)?
    };

    Journal::new()?.record(Operation::MergeCompleted {
        branches: execution.merged_branches.clone(),
        success: execution.conflict_branch.is_none(),
    })?;

    if let Some(conflicted) = execution.conflict_branch {
        return Err(ConflictPending(conflicted).into());
    }

    println!(
        "\n{} Merged {} PR{}",
        "✓".green().bold(),
        execution.merged_branches.len(),
        if execution.merged_branches.len() == 1 { "" } else { "s" }
    );
    Ok(())
}
