use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::validation;

/// Start tracking an existing branch.
pub fn run_track(branch: Option<String>, parent: Option<String>, scope: Option<String>) -> Result<()> {
    let engine = StackEngine::open()?;
    let branch = match branch {
        Some(b) => b,
        None => validation::require_on_branch(&engine.gateway)?,
    };

    let effective_parent = engine.track(&branch, parent.as_deref(), scope.as_deref())?;

    println!(
        "{} Tracking {} with parent {}",
        "✓".green().bold(),
        branch.green(),
        effective_parent.blue()
    );
    if let Some(scope) = scope {
        println!("  scope: {}", scope.cyan());
    }
    Ok(())
}

/// Stop tracking a branch; the git ref is left alone.
pub fn run_untrack(branch: Option<String>) -> Result<()> {
    let engine = StackEngine::open()?;
    let branch = match branch {
        Some(b) => b,
        None => validation::require_on_branch(&engine.gateway)?,
    };

    engine.untrack(&branch)?;
    println!("{} Stopped tracking {}", "✓".green().bold(), branch.green());
    Ok(())
}
