//! Interactive prompts.

use anyhow::Result;
use console::Term;
use dialoguer::Confirm;

/// Ask a yes/no question.
///
/// Without a TTY the default answer is taken, so scripted runs never
/// block on a prompt.
pub fn confirm(message: &str, default: bool) -> Result<bool> {
    if !Term::stdout().is_term() {
        return Ok(default);
    }

    Ok(Confirm::new()
        .with_prompt(message)
        .default(default)
        .interact()?)
}
