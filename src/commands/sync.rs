use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::errors::ConflictPending;
use crate::forge::{self, PrState};
use crate::journal::{Journal, Operation};
use crate::state::{acquire_operation_lock, OperationKind};
use crate::ui;
use crate::validation;

/// Fetch, fast-forward trunk, detect remotely merged branches, restack
/// everything, and clean up the merged locals.
pub async fn run(no_cleanup: bool, keep: bool) -> Result<()> {
    let _lock = acquire_operation_lock()?;
    let engine = StackEngine::open()?;
    engine.gateway.require_clean_for_rebase()?;

    let original_branch = validation::require_on_branch(&engine.gateway)?;

    engine.snapshot_before("sync", &[])?;

    println!("{} Fetching {}...", "→".blue(), engine.gateway.remote());
    engine.gateway.fetch()?;
    engine.gateway.fast_forward_trunk(&engine.trunk)?;
    println!("  {} {} up to date", "✓".green(), engine.trunk.blue());

    validation::repair_orphaned_metadata(&engine.gateway, &engine.store)?;

    let tracked = engine.store.list_tracked_branches()?;
    Journal::new()?.record(Operation::SyncStarted {
        branches: tracked.clone(),
    })?;

    // Branches whose PR merged remotely go away locally. PR state is the
    // primary signal; patch-id subsumption catches squash merges of
    // branches that never had a PR recorded.
    let infos = forge::fetch_prs_parallel(tracked.clone()).await;
    let mut removed: Vec<String> = Vec::new();
    for (branch, pr) in &infos {
        if let Some(pr) = pr {
            if pr.state == PrState::Merged {
                removed.push(branch.clone());
                println!("  {} {} was merged (PR #{})", "✓".green(), branch.cyan(), pr.number.unwrap_or(0));
            }
        }
    }
    for branch in &tracked {
        if removed.contains(branch) {
            continue;
        }
        if is_squash_merged(&engine, branch)? {
            removed.push(branch.clone());
            println!("  {} {} was squash-merged into {}", "✓".green(), branch.cyan(), engine.trunk.blue());
        }
    }

    // Restack the whole forest, reparenting over the removed branches
    let roots: Vec<String> = engine.store.get_children(&engine.trunk)?.into_iter().collect();
    let branches: Vec<String> = engine
        .store
        .collect_branches_dfs(&roots)?
        .into_iter()
        .filter(|b| !removed.contains(b))
        .collect();

    let conflict = if branches.is_empty() {
        None
    } else {
        let planner = engine.planner();
        let mut state = planner.prepare(OperationKind::Sync, &original_branch, &branches)?;
        state.removed_parents = removed.clone();
        let outcome = planner.run(&mut state)?;

        for result in &outcome.results {
            if let crate::restack::RestackOutcome::Done { new_parent } = &result.outcome {
                println!("  {} restacked {} onto {}", "✓".green(), result.branch.green(), new_parent.blue());
            }
        }

        match outcome.conflict_branch {
            Some(conflicted) => {
                let onto = engine
                    .store
                    .get_parent(&conflicted)?
                    .unwrap_or_else(|| engine.trunk.clone());
                println!();
                ui::display_conflict_message(&conflicted, &onto, &state.remaining_branches, &engine.gateway)?;
                Some(conflicted)
            }
            None => None,
        }
    };

    Journal::new()?.record(Operation::SyncCompleted {
        branches: tracked,
        success: conflict.is_none(),
    })?;

    if let Some(conflicted) = conflict {
        // Cleanup of merged branches happens in `continue`
        return Err(ConflictPending(conflicted).into());
    }

    if !no_cleanup && !keep {
        for branch in &removed {
            if engine.gateway.get_current_branch_name().ok().as_deref() == Some(branch.as_str()) {
                engine.gateway.checkout_branch(&engine.trunk)?;
            }
            if engine.store.is_tracked(branch)? {
                engine.store.remove_metadata(branch)?;
            }
            if engine.gateway.branch_exists(branch)? {
                engine.gateway.delete_branch(branch)?;
            }
            println!("  {} deleted merged branch {}", "✓".green(), branch.dimmed());
        }
    } else if !removed.is_empty() {
        println!(
            "  {} kept {} merged branch(es) (--keep / --no-cleanup)",
            "ℹ".blue(),
            removed.len()
        );
    }

    // Back where we started, unless that branch was just cleaned up
    if engine.gateway.branch_exists(&original_branch)? {
        engine.gateway.checkout_branch(&original_branch)?;
    } else {
        engine.gateway.checkout_branch(&engine.trunk)?;
    }

    println!("\n{} Sync complete!", "✓".green().bold());
    Ok(())
}

/// A branch whose every unique patch already appears in trunk by patch-id
/// was squash-merged upstream.
fn is_squash_merged(engine: &StackEngine, branch: &str) -> Result<bool> {
    if !engine.gateway.branch_exists(branch)? {
        return Ok(false);
    }
    let merge_base = match engine.gateway.merge_base(branch, &engine.trunk) {
        Ok(mb) => mb,
        Err(_) => return Ok(false),
    };
    let branch_range = format!("{}..{}", merge_base, branch);
    let trunk_range = format!("{}..{}", merge_base, engine.trunk);
    engine.gateway.patches_subsumed_by(&branch_range, &trunk_range)
}
