use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;

/// Switch to a branch by name; with no name, list the tracked branches.
pub fn run(name: Option<String>) -> Result<()> {
    let engine = StackEngine::open()?;

    let name = match name {
        Some(n) => n,
        None => {
            let tracked = engine.store.list_tracked_branches()?;
            if tracked.is_empty() {
                anyhow::bail!("No tracked branches. Create one with 'st create'.");
            }
            println!("Tracked branches:");
            for branch in tracked {
                println!("  {}", branch.green());
            }
            return Ok(());
        }
    };

    if !engine.gateway.branch_exists(&name)? {
        anyhow::bail!("Branch '{}' does not exist.", name);
    }

    engine.gateway.checkout_branch(&name)?;
    println!("{} Switched to {}", "✓".green().bold(), name.green());
    Ok(())
}
