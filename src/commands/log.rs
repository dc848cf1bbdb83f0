use anyhow::Result;
use colored::Colorize;

use crate::engine::StackEngine;
use crate::graph::BranchGraph;

/// Render the tracked forest as a tree, trunk at the bottom.
pub fn run() -> Result<()> {
    let engine = StackEngine::open()?;
    let graph = engine.graph()?;

    if graph.is_empty() {
        println!("No tracked branches. Create one with 'st create'.");
        return Ok(());
    }

    // Roots are trunk's direct children
    let roots: Vec<String> = graph
        .children(graph.trunk())
        .iter()
        .rev()
        .cloned()
        .collect();

    for root in &roots {
        print_subtree(&engine, &graph, root, 0)?;
    }
    println!("{}  {}", "◉".blue(), graph.trunk().blue().bold());

    Ok(())
}

fn print_subtree(engine: &StackEngine, graph: &BranchGraph, branch: &str, depth: usize) -> Result<()> {
    // Children first: the tree reads top-down with trunk last
    for child in graph.children(branch).iter().rev() {
        print_subtree(engine, graph, child, depth + 1)?;
    }

    let indent = "  ".repeat(depth);
    let is_current = graph.current_branch() == Some(branch);
    let marker = if is_current { "◉".green() } else { "○".normal() };

    let mut line = format!("{}{}  {}", indent, marker, branch.green());

    if needs_restack(engine, graph, branch)? {
        line.push_str(&format!(" {}", "(needs restack)".yellow()));
    }

    if let Some(record) = graph.get(branch) {
        if let Some(pr) = &record.meta.pr {
            if let Some(n) = pr.number {
                line.push_str(&format!(" {}", format!("#{}", n).dimmed()));
            }
        }
        if let Some(scope) = &record.meta.scope {
            line.push_str(&format!(" {}", format!("[{}]", scope).cyan()));
        }
    }

    println!("{}", line);
    Ok(())
}

fn needs_restack(engine: &StackEngine, graph: &BranchGraph, branch: &str) -> Result<bool> {
    let parent = match graph.parent(branch) {
        Some(p) => p.to_string(),
        None => return Ok(false),
    };
    let parent_tip = match graph.tip(&parent) {
        Some(t) => t.to_string(),
        None => return Ok(false),
    };
    Ok(engine.gateway.merge_base(branch, &parent)? != parent_tip)
}
