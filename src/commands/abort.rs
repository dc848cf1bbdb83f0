use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::state::{ContinuationState, OperationLock};

/// Cancel the interrupted operation and roll back to the snapshot taken
/// before it started.
pub fn run() -> Result<()> {
    let _lock = OperationLock::acquire()?;
    let engine = StackEngine::open()?;

    let state = ContinuationState::load()?;
    let rebase_active = engine.gateway.rebase_in_progress()?;

    if state.is_none() && !rebase_active {
        anyhow::bail!("No operation in progress; nothing to abort.");
    }

    if rebase_active {
        engine.gateway.rebase_abort()?;
        println!("{} Aborted the in-progress rebase", "✓".green());
    }

    if let Some(state) = state {
        println!("{} Rolling back the {}...", "→".blue(), state.kind);

        let (snapshot, report) = engine.undo_restore(None)?;
        for (branch, err) in &report.failures {
            eprintln!("  {} could not restore {}: {}", "!".yellow(), branch, err);
        }
        println!(
            "  {} restored {} branch(es) from the snapshot taken before '{}'",
            "✓".green(),
            report.restored.len() + report.recreated.len(),
            snapshot.command
        );

        ContinuationState::clear()?;
    }

    println!("\n{} Aborted.", "✓".green().bold());
    Ok(())
}
