//! CI waiting for merge operations.
//!
//! Polls a branch's check status until every required check is out of the
//! pending state. A single failing check short-circuits the wait. Network
//! errors during the loop are logged and retried until the deadline; only
//! the very first poll propagates errors, so misconfiguration surfaces
//! immediately.

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use super::Forge;

/// Configuration for CI waiting behavior
#[derive(Debug, Clone)]
pub struct CiWaitConfig {
    /// Deadline for the whole wait (default: 600 seconds)
    pub timeout_secs: u64,
    /// Seconds between polls (default: 10)
    pub poll_interval_secs: u64,
    /// Whether CI waiting is enabled at all
    pub enabled: bool,
}

impl Default for CiWaitConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            poll_interval_secs: 10,
            enabled: true,
        }
    }
}

/// Result of waiting for CI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiWaitResult {
    /// All checks passed (or none are configured)
    Passed,
    /// At least one check failed; names of the failures
    Failed(Vec<String>),
    /// The deadline elapsed with checks still pending
    TimedOut,
}

/// Wait for a branch's CI checks to reach a terminal state.
pub fn wait_for_checks(forge: &dyn Forge, branch: &str, config: &CiWaitConfig) -> Result<CiWaitResult> {
    if !config.enabled {
        return Ok(CiWaitResult::Passed);
    }

    let start = Instant::now();
    let timeout = Duration::from_secs(config.timeout_secs);
    let interval = Duration::from_secs(config.poll_interval_secs);

    // First poll: a hard failure here is configuration, not flakiness
    let status = forge
        .checks_status(branch)
        .context("Failed to read CI status")?;

    if !status.pending {
        return Ok(if status.passing {
            CiWaitResult::Passed
        } else {
            CiWaitResult::Failed(status.failing().iter().map(|s| s.to_string()).collect())
        });
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("spinner template is valid"),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    loop {
        if start.elapsed() >= timeout {
            spinner.finish_and_clear();
            return Ok(CiWaitResult::TimedOut);
        }

        spinner.set_message(format!(
            "Waiting for CI on {} ({}s / {}s)",
            branch.cyan(),
            start.elapsed().as_secs(),
            config.timeout_secs
        ));

        std::thread::sleep(interval);

        let status = match forge.checks_status(branch) {
            Ok(s) => s,
            Err(e) => {
                // Transient network error: log and keep polling
                spinner.println(format!("  {} CI poll failed ({}), retrying", "!".yellow(), e));
                continue;
            }
        };

        if status.pending {
            continue;
        }

        spinner.finish_and_clear();
        return Ok(if status.passing {
            CiWaitResult::Passed
        } else {
            CiWaitResult::Failed(status.failing().iter().map(|s| s.to_string()).collect())
        });
    }
}
