//! Common types for the forge abstraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Merge method for PRs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MergeMethod {
    /// Create a merge commit
    #[default]
    Merge,
    /// Squash all commits into one before merging
    Squash,
    /// Rebase commits onto the base branch
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMethod::Merge => "merge",
            MergeMethod::Squash => "squash",
            MergeMethod::Rebase => "rebase",
        }
    }
}

impl fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrState {
    Open,
    Merged,
    Closed,
}

impl fmt::Display for PrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrState::Open => write!(f, "open"),
            PrState::Merged => write!(f, "merged"),
            PrState::Closed => write!(f, "closed"),
        }
    }
}

/// A pull request as strata records it against a branch.
///
/// Persisted inside branch metadata, so the shape must stay forward
/// compatible (optional fields, serde defaults).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrRecord {
    /// PR number; absent while creation is still in flight
    #[serde(default)]
    pub number: Option<u64>,
    /// Base branch the PR merges into
    pub base: String,
    /// Web URL
    #[serde(default)]
    pub url: String,
    /// Title
    #[serde(default)]
    pub title: String,
    /// Body text
    #[serde(default)]
    pub body: String,
    /// Open / merged / closed
    pub state: PrState,
    /// Draft flag
    #[serde(default)]
    pub draft: bool,
}

impl PrRecord {
    pub fn is_open(&self) -> bool {
        self.state == PrState::Open
    }
}

/// Fields of a PR that can be updated in place.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct PrUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
    pub base: Option<String>,
    pub draft: Option<bool>,
    pub reviewers: Vec<String>,
}

/// State of a single CI check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pending,
    Passing,
    Failing,
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckState::Pending => write!(f, "pending"),
            CheckState::Passing => write!(f, "passing"),
            CheckState::Failing => write!(f, "failing"),
        }
    }
}

/// One CI check attached to a branch's head commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDetail {
    pub name: String,
    pub status: CheckState,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregate CI status for a branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecksStatus {
    /// Every required check finished successfully
    pub passing: bool,
    /// At least one check has not finished
    pub pending: bool,
    /// Per-check detail
    #[serde(default)]
    pub checks: Vec<CheckDetail>,
}

impl ChecksStatus {
    /// No checks configured at all
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Names of checks that failed
    pub fn failing(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckState::Failing)
            .map(|c| c.name.as_str())
            .collect()
    }
}
