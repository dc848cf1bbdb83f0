use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::validation;

/// Show a branch's place in the stack.
pub fn run(branch: Option<String>) -> Result<()> {
    let engine = StackEngine::open()?;
    let graph = engine.graph()?;

    let branch = match branch {
        Some(b) => b,
        None => validation::require_on_branch(&engine.gateway)?,
    };

    if graph.is_trunk(&branch) {
        println!("{} is the trunk branch", branch.blue().bold());
        let children = graph.children(&branch);
        if !children.is_empty() {
            println!("children: {}", children.join(", "));
        }
        return Ok(());
    }

    let record = match graph.get(&branch) {
        Some(r) => r,
        None => anyhow::bail!("Branch '{}' is not tracked.", branch),
    };

    println!("{}", branch.green().bold());
    println!("  tip:    {}", &record.tip[..7.min(record.tip.len())]);
    println!(
        "  parent: {}",
        record.meta.parent.as_deref().unwrap_or("(none)").blue()
    );

    let children = graph.children(&branch);
    if !children.is_empty() {
        println!("  children: {}", children.join(", "));
    }

    if let Some(scope) = graph.effective_scope(&branch) {
        let own = record.meta.scope.is_some();
        println!(
            "  scope:  {}{}",
            scope.cyan(),
            if own { "" } else { " (inherited)" }
        );
    }

    if let Some(pr) = &record.meta.pr {
        match pr.number {
            Some(n) => println!("  PR:     #{} ({}) → {}", n, pr.state, pr.base),
            None => println!("  PR:     pending"),
        }
        if !pr.url.is_empty() {
            println!("          {}", pr.url.dimmed());
        }
    }

    if record.meta.squashed_merge_fixed {
        println!("  note:   last restack detected a squashed merge upstream");
    }
    if record.meta.fast_forward_fixed {
        println!("  note:   last restack was a fast-forward");
    }

    Ok(())
}
