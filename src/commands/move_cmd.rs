use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::errors::ConflictPending;
use crate::state::acquire_operation_lock;
use crate::ui;
use crate::validation;

/// Move a branch (and its subtree) onto a new parent.
pub fn run(onto: Option<String>, source: Option<String>) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;
    engine.gateway.require_clean_for_rebase()?;

    let onto = match onto {
        Some(o) => o,
        None => anyhow::bail!("Specify the new parent with --onto <branch>."),
    };
    let source = match source {
        Some(s) => s,
        None => validation::require_on_branch(&engine.gateway)?,
    };

    let outcome = engine.move_onto(&source, &onto)?;

    if let Some(conflicted) = outcome.conflict_branch {
        println!();
        ui::display_conflict_message(&conflicted, &onto, &[], &engine.gateway)?;
        return Err(ConflictPending(conflicted).into());
    }

    println!(
        "{} Moved {} onto {}",
        "✓".green().bold(),
        source.green(),
        onto.blue()
    );
    Ok(())
}
