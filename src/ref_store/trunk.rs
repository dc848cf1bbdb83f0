//! Trunk configuration for RefStore.

use anyhow::{Context, Result};

use crate::program_name::program_name;

use super::{RefStore, TRUNK_REF};

impl RefStore {
    /// Set the trunk branch name
    pub fn set_trunk(&self, trunk: &str) -> Result<()> {
        if !self.gateway.branch_exists(trunk)? {
            anyhow::bail!("Branch '{}' does not exist; cannot set it as trunk.", trunk);
        }
        self.gateway
            .write_blob_ref(TRUNK_REF, trunk.as_bytes(), &format!("st: set trunk to {}", trunk))
            .context("Failed to write trunk config")
    }

    /// Get the configured trunk branch name, if any
    pub fn get_trunk(&self) -> Result<Option<String>> {
        match self.gateway.read_blob_ref(TRUNK_REF)? {
            Some(bytes) => {
                let trunk = String::from_utf8(bytes).context("Trunk config is not valid UTF-8")?;
                Ok(Some(trunk.trim().to_string()))
            }
            None => Ok(None),
        }
    }

    /// Get the trunk branch name, failing with init guidance if unset
    pub fn require_trunk(&self) -> Result<String> {
        self.get_trunk()?.with_context(|| {
            format!(
                "Repository is not initialized. Run '{} init' first.",
                program_name()
            )
        })
    }
}
