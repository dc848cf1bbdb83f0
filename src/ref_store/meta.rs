//! The per-branch metadata record and its validation.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::forge::PrRecord;

/// Metadata record for one tracked branch.
///
/// Serialized as JSON into a blob under `refs/strata/meta/<branch>`.
/// Fields added by newer versions must be optional with serde defaults so
/// older versions keep reading newer records (unknown fields are ignored).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchMetadata {
    /// Parent branch name; absent only for records written for trunk itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Optional scope token (e.g. a ticket id), inherited by descendants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Attached pull request, if one has been created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PrRecord>,

    /// The branch's unique patches were found already present in its new
    /// parent (a squash-and-merge landed upstream); the last restack was a
    /// pointer move
    #[serde(default)]
    pub squashed_merge_fixed: bool,

    /// The branch had no commits of its own at its last restack; it was
    /// fast-forwarded to its parent's tip without a rebase
    #[serde(default)]
    pub fast_forward_fixed: bool,

    /// Last SHA we pushed to (or observed on) the remote-tracking branch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_sha: Option<String>,
}

/// Validate a branch name read from (or about to be written into) metadata.
///
/// Rejects content that can only come from corruption: empty values, path
/// traversal, control characters, over-long names.
pub fn validate_branch_name(name: &str, owner: &str) -> Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!(
            "Corrupted metadata: record for branch '{}' contains an empty branch name.\n\
             Re-track it with 'st track {}'.",
            owner,
            owner
        );
    }

    if name.contains("..") {
        anyhow::bail!(
            "Corrupted metadata: record for branch '{}' contains an invalid name: '{}'.",
            owner,
            name
        );
    }

    if name.chars().any(|c| c.is_control()) {
        anyhow::bail!(
            "Corrupted metadata: record for branch '{}' contains control characters.",
            owner
        );
    }

    if name.len() > 255 {
        anyhow::bail!(
            "Corrupted metadata: record for branch '{}' exceeds the maximum branch name length.",
            owner
        );
    }

    Ok(())
}
