use anyhow::Result;
use colored::Colorize;

use crate::git_gateway::GitGateway;
use crate::program_name::program_name;
use crate::ref_store::RefStore;

/// Initialize strata in the current repository: pick a trunk and create
/// the state directory.
pub fn run(trunk: Option<String>, reset: bool) -> Result<()> {
    let gateway = GitGateway::new()?;
    let store = RefStore::new()?;

    if reset {
        store.clear_all()?;
        println!("{} Cleared all tracking data", "✓".green());
    } else if store.get_trunk()?.is_some() {
        anyhow::bail!(
            "Already initialized. Use '{} init --reset' to start over.",
            program_name()
        );
    }

    let trunk = match trunk {
        Some(t) => t,
        None => detect_trunk(&gateway)?,
    };

    store.set_trunk(&trunk)?;

    let state_dir = gateway.git_dir().join("strata");
    if !state_dir.exists() {
        std::fs::create_dir_all(&state_dir)?;
    }

    println!("{} Initialized with trunk '{}'", "✓".green().bold(), trunk.blue());
    println!(
        "\nNext: create your first stacked branch with '{} create -m \"...\"'",
        program_name()
    );
    Ok(())
}

/// Prefer main, then master, then the current branch.
fn detect_trunk(gateway: &GitGateway) -> Result<String> {
    for candidate in ["main", "master"] {
        if gateway.branch_exists(candidate)? {
            return Ok(candidate.to_string());
        }
    }
    gateway.get_current_branch_name()
}
