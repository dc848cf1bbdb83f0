use anyhow::{Context, Result};
use colored::Colorize;

use crate::engine::StackEngine;
use crate::errors::ConflictPending;
use crate::state::{ContinuationState, OperationLock};
use crate::ui;

/// Resume the interrupted operation after conflict resolution.
pub fn run() -> Result<()> {
    // Raw lock: the interrupted-operation check would reject us here
    let _lock = OperationLock::acquire()?;
    let engine = StackEngine::open()?;

    let mut state = ContinuationState::load()?.context(
        "No operation to continue. Did you mean 'git rebase --continue'?",
    )?;

    println!("{} Continuing {}...", "→".blue(), state.kind);

    let planner = engine.planner();
    let outcome = planner.resume(&mut state)?;

    if let Some(conflicted) = outcome.conflict_branch {
        let onto = engine
            .store
            .get_parent(&conflicted)?
            .unwrap_or_else(|| engine.trunk.clone());
        println!();
        ui::display_conflict_message(&conflicted, &onto, &state.remaining_branches, &engine.gateway)?;
        return Err(ConflictPending(conflicted).into());
    }

    // Deletions the interrupted batch still owed (merged/deleted branches
    // whose metadata was kept alive for reparenting)
    for branch in engine.finish_removals(&state)? {
        println!("  {} removed {}", "✓".green(), branch.dimmed());
    }

    // Back to where the user was when the operation started
    if engine.gateway.branch_exists(&state.original_branch)? {
        engine.gateway.checkout_branch(&state.original_branch)?;
    } else {
        engine.gateway.checkout_branch(&engine.trunk)?;
    }
    ContinuationState::clear()?;

    println!("\n{} {} complete!", "✓".green().bold(), state.kind);
    Ok(())
}
