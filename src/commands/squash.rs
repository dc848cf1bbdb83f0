use anyhow::Result;
use colored::Colorize;

use crate::commands::restack::restack_children;
use crate::engine::StackEngine;
use crate::state::acquire_operation_lock;
use crate::validation;

/// Squash the current branch's commits into one, then restack descendants.
pub fn run(message: Option<String>) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;
    engine.gateway.require_clean_for_rebase()?;

    let current = validation::require_on_branch(&engine.gateway)?;
    validation::require_not_trunk(&current, &engine.trunk)?;
    validation::require_tracked(&engine.store, &current)?;

    let parent = engine
        .store
        .get_parent(&current)?
        .unwrap_or_else(|| engine.trunk.clone());

    let count = engine.gateway.rev_count(&format!("{}..{}", parent, current))?;
    if count < 2 {
        println!("{} Nothing to squash: branch has {} commit", "ℹ".blue(), count);
        return Ok(());
    }

    engine.snapshot_before("squash", &[current.clone()])?;

    // Keep the oldest commit's message unless one was given
    let message = match message {
        Some(m) => m,
        None => {
            let oldest = engine
                .gateway
                .rev_list(&format!("{}..{}", parent, current))?
                .pop()
                .expect("count checked above");
            engine.gateway.commit_subject(&oldest)?
        }
    };

    let old_tip = engine.gateway.get_branch_sha(&current)?;
    let parent_sha = engine.gateway.get_branch_sha(&parent)?;
    engine.gateway.run_git_success(&["reset", "--soft", &parent_sha])?;
    engine.gateway.commit(&message)?;
    engine.gateway.refresh()?;

    println!(
        "{} Squashed {} commits on {}",
        "✓".green().bold(),
        count,
        current.green()
    );

    restack_children(&engine, &current, &old_tip)?;
    Ok(())
}
