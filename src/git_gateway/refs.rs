//! Ref and blob plumbing for GitGateway.
//!
//! strata's metadata lives in the object database as blobs pointed to by
//! refs under `refs/strata/`. These wrappers delegate to the backend so
//! both files and reftable repositories work.

use anyhow::Result;

use crate::git_backend::Oid;

use super::GitGateway;

impl GitGateway {
    /// Create or overwrite a reference
    pub fn create_reference(&self, name: &str, target: &Oid, force: bool, msg: &str) -> Result<()> {
        self.backend().create_reference(name, target, force, msg)
    }

    /// Delete a reference (idempotent)
    pub fn delete_reference(&self, name: &str) -> Result<()> {
        self.backend().delete_reference(name)
    }

    /// Find a reference's target OID
    pub fn find_reference(&self, name: &str) -> Result<Option<Oid>> {
        self.backend().find_reference(name)
    }

    /// List references matching a glob pattern
    pub fn list_references(&self, pattern: &str) -> Result<Vec<(String, Oid)>> {
        self.backend().list_references(pattern)
    }

    /// Store a blob, returning its OID
    pub fn create_blob(&self, content: &[u8]) -> Result<Oid> {
        self.backend().create_blob(content)
    }

    /// Read a blob's content
    pub fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        self.backend().read_blob(oid)
    }

    /// Write `content` as a blob and point `ref_name` at it
    pub fn write_blob_ref(&self, ref_name: &str, content: &[u8], msg: &str) -> Result<()> {
        let oid = self.create_blob(content)?;
        self.create_reference(ref_name, &oid, true, msg)
    }

    /// Read the blob a ref points to, as bytes
    pub fn read_blob_ref(&self, ref_name: &str) -> Result<Option<Vec<u8>>> {
        match self.find_reference(ref_name)? {
            Some(oid) => Ok(Some(self.read_blob(&oid)?)),
            None => Ok(None),
        }
    }
}
