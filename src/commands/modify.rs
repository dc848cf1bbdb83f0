use anyhow::Result;
use colored::Colorize;

use crate::commands::restack::restack_children;
use crate::engine::StackEngine;
use crate::state::acquire_operation_lock;
use crate::validation;

/// Amend (or append a commit to) the current branch and restack its
/// descendants.
pub fn run(all: bool, message: Option<String>, new_commit: bool) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;

    let current = validation::require_on_branch(&engine.gateway)?;
    validation::require_not_trunk(&current, &engine.trunk)?;
    validation::require_tracked(&engine.store, &current)?;

    if all {
        engine.gateway.stage_all()?;
    }

    if !engine.gateway.has_staged_changes()? && message.is_none() {
        println!("{} Nothing staged and no message; nothing to do.", "ℹ".blue());
        return Ok(());
    }

    engine.snapshot_before("modify", &[current.clone()])?;

    let old_tip = engine.gateway.get_branch_sha(&current)?;

    if new_commit {
        let message = message.unwrap_or_else(|| "update".to_string());
        engine.gateway.commit(&message)?;
        println!("{} Committed to {}", "✓".green().bold(), current.green());
    } else {
        engine.gateway.amend_commit(message.as_deref())?;
        println!("{} Amended {}", "✓".green().bold(), current.green());
    }
    engine.gateway.refresh()?;

    restack_children(&engine, &current, &old_tip)?;
    Ok(())
}
