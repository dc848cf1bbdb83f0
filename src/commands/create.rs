use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;

/// Create a new stacked branch off the current branch.
pub fn run(message: Vec<String>, name: Option<String>, scope: Option<String>, all: bool) -> Result<()> {
    let engine = StackEngine::open()?;

    let message = if message.is_empty() {
        None
    } else {
        Some(message.join(" "))
    };

    let created = engine.create(name, message.as_deref(), scope.as_deref(), all)?;

    println!("{} Created branch {}", "✓".green().bold(), created.green());
    if message.is_some() && engine.gateway.rev_count(&format!("{}..{}", engine.trunk, created))? > 0 {
        println!("  committed staged changes");
    }
    Ok(())
}
