use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::journal::{Journal, Operation};
use crate::state::acquire_operation_lock;
use crate::validation;

/// Split the current branch at a commit boundary.
///
/// The new branch takes the commits up to (and including) `at` and slots
/// in between the current branch and its parent; history is unchanged, so
/// no rebase is needed.
pub fn run(new_name: String, at: String) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;

    let current = validation::require_on_branch(&engine.gateway)?;
    validation::require_not_trunk(&current, &engine.trunk)?;
    validation::require_tracked(&engine.store, &current)?;

    if engine.gateway.branch_exists(&new_name)? {
        anyhow::bail!("Branch '{}' already exists.", new_name);
    }

    let split_point = engine.gateway.resolve(&at)?.to_string();
    let parent = engine
        .store
        .get_parent(&current)?
        .unwrap_or_else(|| engine.trunk.clone());

    // The split point must lie strictly inside the branch's own range
    if !engine.gateway.is_ancestor(&split_point, &current)? {
        anyhow::bail!("'{}' is not an ancestor of '{}'.", at, current);
    }
    if !engine.gateway.is_ancestor(&parent, &split_point)? {
        anyhow::bail!("'{}' is below '{}'s parent '{}'.", at, current, parent);
    }
    if split_point == engine.gateway.get_branch_sha(&current)? {
        anyhow::bail!("'{}' is the branch tip; there is nothing to split off above it.", at);
    }

    engine.snapshot_before("split", &[new_name.clone(), at.clone()])?;

    let scope = engine.store.get_scope(&current)?;
    engine.gateway.create_branch_at(&new_name, &split_point)?;
    engine
        .store
        .register_branch(&new_name, Some(&parent), scope.as_deref())?;
    engine.store.reparent(&current, &new_name)?;

    Journal::new()?.record(Operation::BranchCreated {
        branch: new_name.clone(),
        parent: Some(parent),
    })?;

    println!(
        "{} Split {} at {}: new branch {} inserted below",
        "✓".green().bold(),
        current.green(),
        &split_point[..7],
        new_name.green()
    );
    Ok(())
}
