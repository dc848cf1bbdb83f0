use anyhow::Result;
use colored::Colorize;

use crate::context::ExecutionContext;
use crate::engine::StackEngine;
use crate::errors::ConflictPending;
use crate::journal::{Journal, Operation};
use crate::restack::RestackOutcome;
use crate::state::{acquire_operation_lock, OperationKind};
use crate::ui;
use crate::validation;

/// Scope of a restack invocation
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RestackScope {
    /// All tracked branches
    All,
    /// Only the named branch
    Only,
    /// The branch and all descendants
    Upstack,
    /// All ancestors down to trunk
    Downstack,
}

pub fn run(branch: Option<String>, only: bool, downstack: bool, upstack: bool) -> Result<()> {
    let scope = if only {
        RestackScope::Only
    } else if downstack {
        RestackScope::Downstack
    } else if upstack || branch.is_some() {
        RestackScope::Upstack
    } else {
        RestackScope::All
    };

    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;
    engine.gateway.require_clean_for_rebase()?;

    let original_branch = validation::require_on_branch(&engine.gateway)?;
    validation::repair_orphaned_metadata(&engine.gateway, &engine.store)?;
    engine.graph()?.check_invariants()?;

    let start = branch.unwrap_or_else(|| original_branch.clone());
    let branches = collect_branches(&engine, &start, scope)?;

    if branches.is_empty() {
        println!("{} No branches to restack", "✓".green().bold());
        return Ok(());
    }

    if ExecutionContext::is_dry_run() {
        println!(
            "{} Dry run - would restack {} branches:",
            "[preview]".yellow().bold(),
            branches.len().to_string().yellow()
        );
        for b in &branches {
            let parent = engine.store.get_parent(b)?.unwrap_or_else(|| engine.trunk.clone());
            println!("  • {} onto {}", b.green(), parent.blue());
        }
        return Ok(());
    }

    engine.snapshot_before("restack", &branches)?;
    Journal::new()?.record(Operation::RestackStarted {
        branches: branches.clone(),
    })?;

    println!(
        "{} Restacking {} branches:",
        "→".blue(),
        branches.len().to_string().yellow()
    );

    let planner = engine.planner();
    let mut state = planner.prepare(OperationKind::Restack, &original_branch, &branches)?;
    let outcome = planner.run(&mut state)?;

    let total = outcome.results.len() + state.remaining_branches.len();
    for (i, result) in outcome.results.iter().enumerate() {
        match &result.outcome {
            RestackOutcome::Done { new_parent } => println!(
                "  {} [{}/{}] {} onto {}",
                "✓".green(),
                i + 1,
                total,
                result.branch.green(),
                new_parent.blue()
            ),
            RestackOutcome::Unneeded => println!(
                "  {} [{}/{}] {} already in place",
                "✓".green(),
                i + 1,
                total,
                result.branch
            ),
            RestackOutcome::Conflict => {}
        }
    }

    Journal::new()?.record(Operation::RestackCompleted {
        branches,
        success: !outcome.has_conflict(),
    })?;

    if let Some(conflicted) = outcome.conflict_branch {
        let onto = engine
            .store
            .get_parent(&conflicted)?
            .unwrap_or_else(|| engine.trunk.clone());
        println!();
        ui::display_conflict_message(&conflicted, &onto, &state.remaining_branches, &engine.gateway)?;
        return Err(ConflictPending(conflicted).into());
    }

    engine.gateway.checkout_branch(&original_branch)?;
    println!();
    println!("{} Restack complete!", "✓".green().bold());
    Ok(())
}

fn collect_branches(engine: &StackEngine, start: &str, scope: RestackScope) -> Result<Vec<String>> {
    let trunk = &engine.trunk;

    match scope {
        RestackScope::All => {
            let roots: Vec<String> = engine
                .store
                .get_children(trunk)?
                .into_iter()
                .collect();
            engine.store.collect_branches_dfs(&roots)
        }
        RestackScope::Only => {
            validation::require_not_trunk(start, trunk)?;
            validation::require_tracked(&engine.store, start)?;
            Ok(vec![start.to_string()])
        }
        RestackScope::Upstack => {
            validation::require_not_trunk(start, trunk)?;
            validation::require_tracked(&engine.store, start)?;
            let roots = vec![start.to_string()];
            engine.store.collect_branches_dfs(&roots)
        }
        RestackScope::Downstack => {
            validation::require_not_trunk(start, trunk)?;
            validation::require_tracked(&engine.store, start)?;
            engine.store.ancestors(start)
        }
    }
}

/// Restack all descendants of a branch after its history was rewritten.
/// Shared by modify and squash.
///
/// `old_tip` is the branch's tip before the rewrite. Children are still
/// based on it, and it is the only correct cut point for their commits;
/// deriving a merge base against the rewritten history would drag the
/// pre-rewrite commits along.
pub fn restack_children(engine: &StackEngine, parent_branch: &str, old_tip: &str) -> Result<()> {
    let descendants = engine.store.descendants(parent_branch)?;
    if descendants.is_empty() {
        return Ok(());
    }

    let planner = engine.planner();
    let mut state = planner.prepare(OperationKind::Restack, parent_branch, &descendants)?;
    state.old_bases.insert(parent_branch.to_string(), old_tip.to_string());
    let outcome = planner.run(&mut state)?;

    for result in &outcome.results {
        if let RestackOutcome::Done { new_parent } = &result.outcome {
            println!("  {} restacked {} onto {}", "✓".green(), result.branch.green(), new_parent.blue());
        }
    }

    if let Some(conflicted) = outcome.conflict_branch {
        let onto = engine
            .store
            .get_parent(&conflicted)?
            .unwrap_or_else(|| engine.trunk.clone());
        println!();
        ui::display_conflict_message(&conflicted, &onto, &state.remaining_branches, &engine.gateway)?;
        return Err(ConflictPending(conflicted).into());
    }

    engine.gateway.checkout_branch(parent_branch)?;
    Ok(())
}
