use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{generate, shells::Shell};

use crate::program_name::program_name;

/// Generate shell completions to stdout.
pub fn run(shell: Shell) -> Result<()> {
    let mut cmd = crate::Cli::command();
    let name = program_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}
