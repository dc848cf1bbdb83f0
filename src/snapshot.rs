//! Snapshot store: bounded undo log inside the ref namespace.
//!
//! Before any mutating operation the engine captures the complete tracked
//! graph: every branch's tip, parent, scope, and PR info, plus the branch
//! HEAD was on. One ref per snapshot under `refs/strata/snapshots/<id>`,
//! with an insertion-ordered index blob at `refs/strata/snapshot-index`
//! pruned to the configured depth on every write.
//!
//! Capture reads the same refs a concurrent reader would, under the
//! operation lock, so the recorded state is exactly the pre-operation
//! state. Restore is best-effort per branch: failures are reported, never
//! retried automatically.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::forge::PrRecord;
use crate::ref_store::{BranchMetadata, RefStore};

/// Prefix for per-snapshot refs
const SNAPSHOT_REF_PREFIX: &str = "refs/strata/snapshots/";
/// Ref holding the ordered snapshot index
const SNAPSHOT_INDEX_REF: &str = "refs/strata/snapshot-index";

/// Monotonic counter so snapshots taken within one nanosecond tick still
/// get distinct, strictly ordered ids
static SNAPSHOT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Per-branch state recorded in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotBranch {
    pub tip: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub pr: Option<PrRecord>,
}

/// An immutable capture of the tracked graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// The command that was about to mutate state
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Branch HEAD pointed at when the snapshot was taken
    #[serde(default)]
    pub head_branch: Option<String>,
    pub branches: BTreeMap<String, SnapshotBranch>,
}

/// Outcome of restoring a snapshot; restoration is best-effort per branch
#[derive(Debug, Default)]
pub struct RestoreReport {
    /// Branches whose tip and metadata were reset
    pub restored: Vec<String>,
    /// Branches recreated because they no longer existed
    pub recreated: Vec<String>,
    /// Branches deleted because the snapshot does not contain them
    pub deleted: Vec<String>,
    /// (branch, error) pairs for branches that could not be restored
    pub failures: Vec<(String, String)>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The snapshot store, bounded to `limit` entries
pub struct SnapshotStore<'a> {
    store: &'a RefStore,
    limit: usize,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(store: &'a RefStore, limit: usize) -> Self {
        Self { store, limit }
    }

    fn snapshot_ref(id: &str) -> String {
        format!("{}{}", SNAPSHOT_REF_PREFIX, id)
    }

    /// Capture the current tracked graph.
    ///
    /// Iterates all tracked branches and records tip, parent, scope, and PR
    /// info; serializes the snapshot into the ref namespace; prunes the
    /// index to the depth bound (oldest insertion evicted first).
    pub fn capture(&self, command: &str, args: &[String]) -> Result<Snapshot> {
        let gateway = self.store.gateway();

        let mut branches = BTreeMap::new();
        for name in self.store.list_tracked_branches()? {
            let meta = match self.store.read_metadata(&name)? {
                Some(m) => m,
                None => continue,
            };
            let tip = match gateway.get_branch_sha(&name) {
                Ok(sha) => sha,
                Err(_) => continue,
            };
            branches.insert(
                name,
                SnapshotBranch {
                    tip,
                    parent: meta.parent,
                    scope: meta.scope,
                    pr: meta.pr,
                },
            );
        }

        let head_branch = gateway.get_current_branch_name().ok();
        let timestamp = Utc::now();
        let id = Self::make_id(&branches, timestamp);

        let snapshot = Snapshot {
            id: id.clone(),
            timestamp,
            command: command.to_string(),
            args: args.to_vec(),
            head_branch,
            branches,
        };

        let payload = serde_json::to_vec(&snapshot).context("Failed to serialize snapshot")?;
        gateway.write_blob_ref(&Self::snapshot_ref(&id), &payload, &format!("st: snapshot before {}", command))?;

        self.append_to_index(&id)?;
        Ok(snapshot)
    }

    /// Snapshot id: nanosecond timestamp, process counter, payload digest.
    ///
    /// The counter breaks ties between snapshots sharing a wall-clock
    /// timestamp; index order stays strictly insertion order.
    fn make_id(branches: &BTreeMap<String, SnapshotBranch>, timestamp: DateTime<Utc>) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let counter = SNAPSHOT_COUNTER.fetch_add(1, Ordering::SeqCst);

        let mut hasher = Sha256::new();
        hasher.update(timestamp.to_rfc3339().as_bytes());
        for (name, branch) in branches {
            hasher.update(name.as_bytes());
            hasher.update(branch.tip.as_bytes());
        }
        let digest = format!("{:x}", hasher.finalize());

        format!("{}-{}-{}", nanos, counter, &digest[..8])
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.store.gateway().read_blob_ref(SNAPSHOT_INDEX_REF)? {
            Some(bytes) => serde_json::from_slice(&bytes).context("Snapshot index is corrupted"),
            None => Ok(Vec::new()),
        }
    }

    fn write_index(&self, ids: &[String]) -> Result<()> {
        let payload = serde_json::to_vec(ids)?;
        self.store
            .gateway()
            .write_blob_ref(SNAPSHOT_INDEX_REF, &payload, "st: update snapshot index")
    }

    fn append_to_index(&self, id: &str) -> Result<()> {
        let mut ids = self.read_index()?;
        ids.push(id.to_string());

        // Evict oldest insertions beyond the depth bound
        while ids.len() > self.limit {
            let evicted = ids.remove(0);
            self.store
                .gateway()
                .delete_reference(&Self::snapshot_ref(&evicted))
                .ok();
        }

        self.write_index(&ids)
    }

    /// Snapshot ids, oldest first
    pub fn list_ids(&self) -> Result<Vec<String>> {
        self.read_index()
    }

    /// Load one snapshot by id
    pub fn get(&self, id: &str) -> Result<Option<Snapshot>> {
        match self.store.gateway().read_blob_ref(&Self::snapshot_ref(id))? {
            Some(bytes) => {
                let snapshot = serde_json::from_slice(&bytes).context("Snapshot payload is corrupted")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    /// All retained snapshots, oldest first
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for id in self.list_ids()? {
            if let Some(s) = self.get(&id)? {
                snapshots.push(s);
            }
        }
        Ok(snapshots)
    }

    /// The most recent snapshot
    pub fn latest(&self) -> Result<Option<Snapshot>> {
        match self.list_ids()?.last() {
            Some(id) => self.get(id),
            None => Ok(None),
        }
    }

    /// Restore the repository to a snapshot's recorded state.
    ///
    /// Any in-progress rebase or merge is aborted first. Branches in the
    /// snapshot get their tip and metadata reset (recreated if missing);
    /// tracked branches absent from the snapshot are deleted. HEAD moves to
    /// the snapshot's recorded branch when possible.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<RestoreReport> {
        let gateway = self.store.gateway();
        let mut report = RestoreReport::default();

        if gateway.rebase_in_progress()? {
            gateway.rebase_abort().ok();
        }
        if gateway.merge_in_progress()? {
            gateway.merge_abort().ok();
        }

        for (name, recorded) in &snapshot.branches {
            let result = (|| -> Result<bool> {
                let existed = gateway.branch_exists(name)?;
                if existed {
                    gateway.set_branch_sha(name, &recorded.tip)?;
                } else {
                    gateway.create_branch_at(name, &recorded.tip)?;
                }

                let meta = BranchMetadata {
                    parent: recorded.parent.clone(),
                    scope: recorded.scope.clone(),
                    pr: recorded.pr.clone(),
                    ..Default::default()
                };
                self.store.write_metadata(name, &meta)?;
                Ok(existed)
            })();

            match result {
                Ok(true) => report.restored.push(name.clone()),
                Ok(false) => report.recreated.push(name.clone()),
                Err(e) => report.failures.push((name.clone(), format!("{:#}", e))),
            }
        }

        // Branches tracked now but absent from the snapshot are deleted
        let current_branch = gateway.get_current_branch_name().ok();
        for name in self.store.list_tracked_branches()? {
            if snapshot.branches.contains_key(&name) {
                continue;
            }
            let result = (|| -> Result<()> {
                // Move off a branch we are about to delete
                if current_branch.as_deref() == Some(name.as_str()) {
                    let target = snapshot
                        .head_branch
                        .clone()
                        .unwrap_or_else(|| self.store.require_trunk().unwrap_or_default());
                    if !target.is_empty() {
                        gateway.checkout_branch_force(&target)?;
                    }
                }
                self.store.remove_metadata(&name)?;
                if gateway.branch_exists(&name)? {
                    gateway.delete_branch(&name)?;
                }
                Ok(())
            })();

            match result {
                Ok(()) => report.deleted.push(name.clone()),
                Err(e) => report.failures.push((name.clone(), format!("{:#}", e))),
            }
        }

        if let Some(head) = &snapshot.head_branch {
            if gateway.branch_exists(head).unwrap_or(false) {
                if let Err(e) = gateway.checkout_branch_force(head) {
                    report.failures.push((head.clone(), format!("{:#}", e)));
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{commit_file, init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    fn create_branch(repo: &git2::Repository, name: &str) -> Result<()> {
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head, false)?;
        Ok(())
    }

    #[test]
    fn test_capture_records_tracked_branches() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        create_branch(&repo, "a")?;
        store.set_parent("a", "main")?;

        let snapshots = SnapshotStore::new(&store, 20);
        let snapshot = snapshots.capture("move", &["--onto".to_string(), "main".to_string()])?;

        assert_eq!(snapshot.command, "move");
        assert_eq!(snapshot.branches.len(), 1);
        let recorded = &snapshot.branches["a"];
        assert_eq!(recorded.parent.as_deref(), Some("main"));
        assert_eq!(recorded.tip, store.gateway().get_branch_sha("a")?);
        assert_eq!(snapshot.head_branch.as_deref(), Some("main"));
        Ok(())
    }

    #[test]
    fn test_index_orders_and_evicts() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        create_branch(&repo, "a")?;
        store.set_parent("a", "main")?;

        let snapshots = SnapshotStore::new(&store, 3);
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(snapshots.capture("op", &[i.to_string()])?.id);
        }

        let kept = snapshots.list_ids()?;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept, ids[2..].to_vec());
        // Evicted snapshots are gone, retained ones load
        assert!(snapshots.get(&ids[0])?.is_none());
        assert!(snapshots.get(&ids[4])?.is_some());
        Ok(())
    }

    #[test]
    fn test_ids_are_unique_and_ordered_within_one_instant() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        create_branch(&repo, "a")?;
        store.set_parent("a", "main")?;

        let snapshots = SnapshotStore::new(&store, 20);
        let id1 = snapshots.capture("op", &[])?.id;
        let id2 = snapshots.capture("op", &[])?.id;
        assert_ne!(id1, id2);
        assert_eq!(snapshots.list_ids()?, vec![id1, id2]);
        Ok(())
    }

    #[test]
    fn test_restore_resets_tip_and_metadata() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        create_branch(&repo, "a")?;
        store.set_parent("a", "main")?;

        let snapshots = SnapshotStore::new(&store, 20);
        let snapshot = snapshots.capture("modify", &[])?;
        let old_tip = snapshot.branches["a"].tip.clone();

        // Mutate: advance the branch and change its metadata
        repo.set_head("refs/heads/a")?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        commit_file(&repo, "f.txt", "x\n", "work")?;
        store.update_metadata("a", |m| m.scope = Some("TCK-1".to_string()))?;
        assert_ne!(store.gateway().get_branch_sha("a")?, old_tip);

        let report = snapshots.restore(&snapshot)?;
        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(store.gateway().get_branch_sha("a")?, old_tip);
        assert_eq!(store.read_metadata("a")?.unwrap().scope, None);
        // HEAD moved back to the recorded branch
        assert_eq!(store.gateway().get_current_branch_name()?, "main");
        Ok(())
    }

    #[test]
    fn test_restore_recreates_missing_and_deletes_extra() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        create_branch(&repo, "a")?;
        store.set_parent("a", "main")?;

        let snapshots = SnapshotStore::new(&store, 20);
        let snapshot = snapshots.capture("delete", &[])?;

        // Delete "a"; create and track "b" afterwards
        store.remove_metadata("a")?;
        store.gateway().delete_branch("a")?;
        create_branch(&repo, "b")?;
        store.set_parent("b", "main")?;

        let report = snapshots.restore(&snapshot)?;
        assert!(report.is_clean(), "failures: {:?}", report.failures);
        assert_eq!(report.recreated, vec!["a"]);
        assert_eq!(report.deleted, vec!["b"]);
        assert!(store.is_tracked("a")?);
        assert!(!store.is_tracked("b")?);
        assert!(!store.gateway().branch_exists("b")?);
        Ok(())
    }
}
