//! Configuration system for strata.
//!
//! Layered TOML configuration, highest priority first:
//! 1. Local override: `.git/strata/config.toml` (per-repo, per-user)
//! 2. User global: `~/.config/strata/config.toml` (personal defaults)
//! 3. Repo shared: `.strata/config.toml` (committed, team-wide)
//!
//! Each layer declares only the keys it sets (every field optional); the
//! resolved `Config` applies the layers over built-in defaults.
//!
//! Trunk is not file configuration: it lives in the metadata ref namespace
//! so it travels with the repository.

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::state::find_git_root;

/// Default number of snapshots retained for undo
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 20;
/// Default CI wait deadline in seconds (10 minutes)
pub const DEFAULT_CI_TIMEOUT_SECS: u64 = 600;
/// Default CI poll interval in seconds
pub const DEFAULT_CI_POLL_SECS: u64 = 10;
/// Default branch-name pattern; must contain {message}
pub const DEFAULT_BRANCH_PATTERN: &str = "{username}/{message}";

/// One configuration layer as written on disk. All fields optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigLayer {
    /// Git remote name for push/fetch operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchLayer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotLayer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeLayer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit: Option<SubmitLayer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchLayer {
    /// Branch-name template. Placeholders: {username}, {date}, {message}.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotLayer {
    /// Maximum retained snapshots (positive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeLayer {
    /// CI wait deadline in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_timeout_secs: Option<u64>,
    /// CI poll interval in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitLayer {
    /// Append the stack footer to PR bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_footer: Option<bool>,
}

/// Resolved configuration after merging all layers over defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub remote: String,
    pub branch_pattern: String,
    pub snapshot_limit: usize,
    pub ci_timeout_secs: u64,
    pub ci_poll_interval_secs: u64,
    pub pr_footer: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch_pattern: DEFAULT_BRANCH_PATTERN.to_string(),
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            ci_timeout_secs: DEFAULT_CI_TIMEOUT_SECS,
            ci_poll_interval_secs: DEFAULT_CI_POLL_SECS,
            pr_footer: true,
        }
    }
}

impl Config {
    /// Load configuration, merging repo < user < local over defaults.
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // Lowest priority first; later layers overwrite
        for path in [
            Self::repo_config_path().ok(),
            Self::user_config_path().ok(),
            Self::local_config_path().ok(),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(layer) = Self::load_layer(&path) {
                config.apply(&layer)?;
            }
        }

        Ok(config)
    }

    fn load_layer(path: &PathBuf) -> Option<ConfigLayer> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(layer) => Some(layer),
            Err(e) => {
                eprintln!("Warning: Config file {:?} is invalid ({}), ignoring it", path, e);
                None
            }
        }
    }

    fn apply(&mut self, layer: &ConfigLayer) -> Result<()> {
        if let Some(remote) = &layer.remote {
            self.remote = remote.clone();
        }
        if let Some(branch) = &layer.branch {
            if let Some(pattern) = &branch.pattern {
                validate_branch_pattern(pattern)?;
                self.branch_pattern = pattern.clone();
            }
        }
        if let Some(snapshot) = &layer.snapshot {
            if let Some(limit) = snapshot.limit {
                if limit == 0 {
                    anyhow::bail!("snapshot.limit must be a positive integer");
                }
                self.snapshot_limit = limit;
            }
        }
        if let Some(merge) = &layer.merge {
            if let Some(t) = merge.ci_timeout_secs {
                self.ci_timeout_secs = t;
            }
            if let Some(p) = merge.poll_interval_secs {
                self.ci_poll_interval_secs = p;
            }
        }
        if let Some(submit) = &layer.submit {
            if let Some(f) = submit.pr_footer {
                self.pr_footer = f;
            }
        }
        Ok(())
    }

    /// Path to user config: ~/.config/strata/config.toml
    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine user config directory")?;
        Ok(config_dir.join("strata").join("config.toml"))
    }

    /// Path to local config: .git/strata/config.toml
    pub fn local_config_path() -> Result<PathBuf> {
        let git_root = find_git_root()?;
        Ok(git_root.join(".git").join("strata").join("config.toml"))
    }

    /// Path to repo config: .strata/config.toml (committed, shared)
    pub fn repo_config_path() -> Result<PathBuf> {
        let git_root = find_git_root()?;
        Ok(git_root.join(".strata").join("config.toml"))
    }

    /// Expand the branch-name pattern for a commit message.
    ///
    /// Replaces {username}, {date} (YYYY-MM-DD) and {message} (slugified).
    pub fn format_branch_name(&self, username: &str, message: &str) -> String {
        let date = Local::now().format("%Y-%m-%d").to_string();
        self.branch_pattern
            .replace("{username}", username)
            .replace("{date}", &date)
            .replace("{message}", &slugify(message))
    }

    /// Write a layer back to disk atomically
    pub fn save_layer(path: &PathBuf, layer: &ConfigLayer) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(layer).context("Failed to serialize config")?;
        let temp_path = path.with_extension("toml.tmp");
        fs::write(&temp_path, content).context("Failed to write config file")?;
        fs::rename(&temp_path, path).context("Failed to finalize config file")?;
        Ok(())
    }
}

/// A pattern is usable only if it carries the {message} placeholder;
/// without it every generated branch name would collide.
pub fn validate_branch_pattern(pattern: &str) -> Result<()> {
    if !pattern.contains("{message}") {
        anyhow::bail!(
            "branch.pattern must contain the {{message}} placeholder (got '{}')",
            pattern
        );
    }
    Ok(())
}

/// Reduce a commit message to a branch-name-safe slug
pub fn slugify(message: &str) -> String {
    let mut slug = String::new();
    for c in message.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if (c == ' ' || c == '-' || c == '_' || c == '/') && !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    slug.chars().take(60).collect()
}
