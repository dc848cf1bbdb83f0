use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::errors::ConflictPending;
use crate::state::acquire_operation_lock;
use crate::ui;
use crate::validation;

/// Delete a tracked branch, reparenting and restacking its children.
pub fn run(name: Option<String>, force: bool) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;

    let branch = match name {
        Some(b) => b,
        None => validation::require_on_branch(&engine.gateway)?,
    };

    let children: Vec<String> = engine.store.get_children(&branch)?.into_iter().collect();
    let outcome = engine.delete(&branch, force)?;

    if let Some(conflicted) = outcome.conflict_branch {
        let remaining: Vec<String> = Vec::new();
        ui::display_conflict_message(&conflicted, &engine.trunk, &remaining, &engine.gateway)?;
        return Err(ConflictPending(conflicted).into());
    }

    println!("{} Deleted {}", "✓".green().bold(), branch.green());
    for child in children {
        println!(
            "  {} reparented onto {}",
            child.cyan(),
            engine
                .store
                .get_parent(&child)?
                .unwrap_or_else(|| engine.trunk.clone())
                .blue()
        );
    }
    Ok(())
}
