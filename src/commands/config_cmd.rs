use anyhow::Result;
use colored::Colorize;

use crate::config::{validate_branch_pattern, Config, ConfigLayer};

/// Show the resolved configuration.
pub fn show() -> Result<()> {
    let config = Config::load()?;

    println!("{}", "Resolved configuration:".bold());
    println!("  remote                  = {}", config.remote);
    println!("  branch.pattern          = {}", config.branch_pattern);
    println!("  snapshot.limit          = {}", config.snapshot_limit);
    println!("  merge.ci_timeout_secs   = {}", config.ci_timeout_secs);
    println!("  merge.poll_interval_secs = {}", config.ci_poll_interval_secs);
    println!("  submit.pr_footer        = {}", config.pr_footer);

    println!("\n{}", "Layers (highest priority first):".bold());
    for (label, path) in [
        ("local", Config::local_config_path()),
        ("user", Config::user_config_path()),
        ("repo", Config::repo_config_path()),
    ] {
        if let Ok(path) = path {
            let exists = if path.exists() { "" } else { " (absent)" };
            println!("  {:5} {}{}", label, path.display(), exists.dimmed());
        }
    }
    Ok(())
}

/// Print one resolved value.
pub fn get(key: &str) -> Result<()> {
    let config = Config::load()?;
    let value = match key {
        "remote" => config.remote,
        "branch.pattern" => config.branch_pattern,
        "snapshot.limit" => config.snapshot_limit.to_string(),
        "merge.ci_timeout_secs" => config.ci_timeout_secs.to_string(),
        "merge.poll_interval_secs" => config.ci_poll_interval_secs.to_string(),
        "submit.pr_footer" => config.pr_footer.to_string(),
        _ => anyhow::bail!("Unknown config key '{}'", key),
    };
    println!("{}", value);
    Ok(())
}

/// Set a key in the local (or user) layer.
pub fn set(key: &str, value: &str, local: bool) -> Result<()> {
    let path = if local {
        Config::local_config_path()?
    } else {
        Config::user_config_path()?
    };

    let mut layer: ConfigLayer = if path.exists() {
        toml::from_str(&std::fs::read_to_string(&path)?)?
    } else {
        ConfigLayer::default()
    };

    apply_key(&mut layer, key, Some(value))?;
    Config::save_layer(&path, &layer)?;

    println!("{} {} = {} ({})", "✓".green(), key, value, if local { "local" } else { "user" });
    Ok(())
}

/// Remove a key from the local (or user) layer.
pub fn unset(key: &str, local: bool) -> Result<()> {
    let path = if local {
        Config::local_config_path()?
    } else {
        Config::user_config_path()?
    };

    if !path.exists() {
        println!("{} nothing to unset ({} layer is empty)", "ℹ".blue(), if local { "local" } else { "user" });
        return Ok(());
    }

    let mut layer: ConfigLayer = toml::from_str(&std::fs::read_to_string(&path)?)?;
    apply_key(&mut layer, key, None)?;
    Config::save_layer(&path, &layer)?;

    println!("{} unset {}", "✓".green(), key);
    Ok(())
}

fn apply_key(layer: &mut ConfigLayer, key: &str, value: Option<&str>) -> Result<()> {
    match key {
        "remote" => layer.remote = value.map(String::from),
        "branch.pattern" => {
            if let Some(v) = value {
                validate_branch_pattern(v)?;
            }
            layer.branch.get_or_insert_with(Default::default).pattern = value.map(String::from);
        }
        "snapshot.limit" => {
            let parsed = value.map(|v| v.parse::<usize>()).transpose()?;
            if parsed == Some(0) {
                anyhow::bail!("snapshot.limit must be a positive integer");
            }
            layer.snapshot.get_or_insert_with(Default::default).limit = parsed;
        }
        "merge.ci_timeout_secs" => {
            layer.merge.get_or_insert_with(Default::default).ci_timeout_secs =
                value.map(|v| v.parse::<u64>()).transpose()?;
        }
        "merge.poll_interval_secs" => {
            layer.merge.get_or_insert_with(Default::default).poll_interval_secs =
                value.map(|v| v.parse::<u64>()).transpose()?;
        }
        "submit.pr_footer" => {
            layer.submit.get_or_insert_with(Default::default).pr_footer =
                value.map(|v| v.parse::<bool>()).transpose()?;
        }
        _ => anyhow::bail!("Unknown config key '{}'", key),
    }
    Ok(())
}
