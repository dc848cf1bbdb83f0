use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::state::acquire_operation_lock;
use crate::ui;

/// List snapshots or restore one (the latest by default).
pub fn run(list: bool, index: Option<usize>, force: bool) -> Result<()> {
    let engine = StackEngine::open()?;
    let snapshots = engine.undo_list()?;

    if snapshots.is_empty() {
        println!("No snapshots recorded yet; nothing to undo.");
        return Ok(());
    }

    if list {
        println!("Snapshots (newest first):");
        for (i, snapshot) in snapshots.iter().rev().enumerate() {
            println!(
                "  [{}] {} {} {} ({} branches)",
                i,
                snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
                snapshot.command.green(),
                snapshot.args.join(" ").dimmed(),
                snapshot.branches.len()
            );
        }
        println!("\nRestore one with: st undo --index <n>");
        return Ok(());
    }

    let _lock = acquire_operation_lock()?;

    // Index 0 is the newest snapshot, matching the --list ordering
    let snapshot = match index {
        Some(i) => snapshots
            .iter()
            .rev()
            .nth(i)
            .ok_or_else(|| anyhow::anyhow!("No snapshot at index {} (have {})", i, snapshots.len()))?,
        None => snapshots.last().expect("non-empty checked above"),
    };

    println!(
        "Will restore the state from before '{} {}' ({} branches, {})",
        snapshot.command.green(),
        snapshot.args.join(" "),
        snapshot.branches.len(),
        snapshot.timestamp.format("%Y-%m-%d %H:%M:%S")
    );

    if engine.gateway.has_uncommitted_changes()? {
        anyhow::bail!("You have uncommitted changes; commit or stash them before undoing.");
    }

    if !force && !ui::confirm("Restore this snapshot?", false)? {
        println!("Aborted. Nothing was restored.");
        return Ok(());
    }

    let id = snapshot.id.clone();
    let (snapshot, report) = engine.undo_restore(Some(id.as_str()))?;

    for branch in &report.restored {
        println!("  {} restored {}", "✓".green(), branch.green());
    }
    for branch in &report.recreated {
        println!("  {} recreated {}", "✓".green(), branch.green());
    }
    for branch in &report.deleted {
        println!("  {} deleted {}", "✓".green(), branch.dimmed());
    }
    for (branch, err) in &report.failures {
        eprintln!("  {} {}: {}", "✗".red(), branch, err);
    }

    if report.is_clean() {
        println!("\n{} Restored snapshot from before '{}'", "✓".green().bold(), snapshot.command);
    } else {
        anyhow::bail!("{} branch(es) could not be restored", report.failures.len());
    }
    Ok(())
}
