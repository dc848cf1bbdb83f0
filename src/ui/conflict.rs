//! The conflict message block shown when a restack stops.

use anyhow::Result;
use colored::Colorize;

use crate::git_gateway::GitGateway;
use crate::program_name::program_name;

/// Tell the user exactly where a rebase stopped and what to do next.
pub fn display_conflict_message(
    branch: &str,
    onto: &str,
    remaining: &[String],
    gateway: &GitGateway,
) -> Result<()> {
    println!(
        "{} Conflict while restacking {} onto {}",
        "✗".red().bold(),
        branch.yellow(),
        onto.blue()
    );

    let conflicted = gateway.conflicted_files()?;
    if !conflicted.is_empty() {
        println!("\nConflicted files:");
        for file in &conflicted {
            println!("  {} {}", "UU".red(), file.path);
        }
    }

    if !remaining.is_empty() {
        let rest: Vec<&str> = remaining
            .iter()
            .filter(|b| b.as_str() != branch)
            .map(String::as_str)
            .collect();
        if !rest.is_empty() {
            println!("\nNot yet restacked: {}", rest.join(", ").dimmed());
        }
    }

    println!();
    println!("Resolve the conflicts, stage the files, then run:");
    println!("  {} {}", program_name().cyan(), "continue".cyan());
    println!("Or roll everything back with:");
    println!("  {} {}", program_name().cyan(), "abort".cyan());

    Ok(())
}
