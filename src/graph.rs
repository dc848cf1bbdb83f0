//! In-memory view of the tracked branch forest.
//!
//! A `BranchGraph` is a point-in-time snapshot of every tracked branch's
//! metadata and tip, loaded from the ref store in one pass. Parents are
//! stored by name; children are derived at load time. Handles are values,
//! not back-pointers, so the graph is freely cloneable and carries no
//! lifetime entanglement with the store.
//!
//! The graph does not observe later metadata writes: any code that mutates
//! the store reloads the graph before querying it again.

use anyhow::Result;
use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::ref_store::{BranchMetadata, RefStore};

/// One tracked branch as captured at graph load time
#[derive(Debug, Clone)]
pub struct BranchRecord {
    pub name: String,
    /// Tip SHA at load time
    pub tip: String,
    pub meta: BranchMetadata,
}

/// Point-in-time graph over the tracked forest
#[derive(Debug, Clone)]
pub struct BranchGraph {
    trunk: String,
    trunk_tip: String,
    /// Branch HEAD pointed at when the graph was loaded, if any
    current: Option<String>,
    records: BTreeMap<String, BranchRecord>,
    children: BTreeMap<String, Vec<String>>,
}

impl BranchGraph {
    /// Load the graph from the store: all metadata records plus tips.
    pub fn load(store: &RefStore) -> Result<Self> {
        let trunk = store.require_trunk()?;
        let gateway = store.gateway();
        let trunk_tip = gateway.get_branch_sha(&trunk)?;
        let current = gateway.get_current_branch_name().ok();

        let mut records = BTreeMap::new();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for name in store.list_tracked_branches()? {
            let meta = match store.read_metadata(&name)? {
                Some(m) => m,
                None => continue,
            };
            // A tracked branch whose git ref vanished is skipped here;
            // validation::repair_orphaned_metadata reports and repairs it
            let tip = match gateway.get_branch_sha(&name) {
                Ok(sha) => sha,
                Err(_) => continue,
            };

            if let Some(parent) = &meta.parent {
                children.entry(parent.clone()).or_default().push(name.clone());
            }
            records.insert(name.clone(), BranchRecord { name, tip, meta });
        }

        for siblings in children.values_mut() {
            siblings.sort();
            siblings.dedup();
        }

        Ok(Self {
            trunk,
            trunk_tip,
            current,
            records,
            children,
        })
    }

    /// The trunk branch name
    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    /// Trunk's tip SHA at load time
    pub fn trunk_tip(&self) -> &str {
        &self.trunk_tip
    }

    /// The branch HEAD pointed at when the graph was loaded
    pub fn current_branch(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn is_trunk(&self, name: &str) -> bool {
        name == self.trunk
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// The record for a tracked branch
    pub fn get(&self, name: &str) -> Option<&BranchRecord> {
        self.records.get(name)
    }

    /// Tip SHA of a branch (trunk included)
    pub fn tip(&self, name: &str) -> Option<&str> {
        if self.is_trunk(name) {
            return Some(&self.trunk_tip);
        }
        self.records.get(name).map(|r| r.tip.as_str())
    }

    /// Parent name of a tracked branch
    pub fn parent(&self, name: &str) -> Option<&str> {
        self.records.get(name).and_then(|r| r.meta.parent.as_deref())
    }

    /// Children of a branch (sorted by name, no duplicates)
    pub fn children(&self, name: &str) -> &[String] {
        self.children.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// All tracked branch names, sorted
    pub fn all_tracked(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Number of tracked branches
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ancestors of a branch from its parent up to (excluding) trunk,
    /// nearest parent first.
    pub fn downstack(&self, name: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut current = self.parent(name);

        while let Some(p) = current {
            if self.is_trunk(p) || !seen.insert(p.to_string()) {
                break;
            }
            result.push(p.to_string());
            current = self.parent(p);
        }

        result
    }

    /// All descendants of a branch, BFS order: parents before children.
    pub fn upstack(&self, name: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<&str> = self.children(name).iter().map(String::as_str).collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.to_string()) {
                continue;
            }
            result.push(current.to_string());
            for child in self.children(current) {
                queue.push_back(child);
            }
        }

        result
    }

    /// Sort a set of tracked branches parents-before-children.
    ///
    /// Branches whose parent lies outside the set act as roots, in name
    /// order; sibling order within a parent is name order.
    pub fn topological_sort(&self, branches: &[String]) -> Vec<String> {
        let set: HashSet<&String> = branches.iter().collect();
        let mut result = Vec::with_capacity(branches.len());
        let mut placed = HashSet::new();

        let mut roots: Vec<&String> = branches
            .iter()
            .filter(|b| match self.parent(b) {
                Some(p) => !set.contains(&p.to_string()),
                None => true,
            })
            .collect();
        roots.sort();

        let mut queue: VecDeque<String> = roots.into_iter().cloned().collect();
        while let Some(current) = queue.pop_front() {
            if !placed.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());
            for child in self.children(&current) {
                if set.contains(child) && !placed.contains(child) {
                    queue.push_back(child.clone());
                }
            }
        }

        result
    }

    /// Effective scope of a branch: its own, or the nearest ancestor's.
    pub fn effective_scope(&self, name: &str) -> Option<&str> {
        let mut seen = HashSet::new();
        let mut current = name;

        loop {
            if !seen.insert(current) {
                return None;
            }
            let record = self.records.get(current)?;
            if let Some(scope) = record.meta.scope.as_deref() {
                return Some(scope);
            }
            current = record.meta.parent.as_deref()?;
        }
    }

    /// Verify the parent relation is a forest rooted at trunk: every
    /// parent is trunk or tracked, and no cycles exist.
    pub fn check_invariants(&self) -> Result<()> {
        for record in self.records.values() {
            let parent = match record.meta.parent.as_deref() {
                Some(p) => p,
                None => anyhow::bail!(
                    "Tracked branch '{}' has no parent recorded. Re-track it with 'st track {}'.",
                    record.name,
                    record.name
                ),
            };
            if !self.is_trunk(parent) && !self.is_tracked(parent) {
                anyhow::bail!(
                    "Branch '{}' has parent '{}' which is neither trunk nor tracked. \
                     Re-track it with 'st track {} --parent <branch>'.",
                    record.name,
                    parent,
                    record.name
                );
            }
        }

        // Cycle check: walk up from every branch with a step bound
        for start in self.records.keys() {
            let mut current = start.as_str();
            let mut steps = 0;
            while let Some(p) = self.parent(current) {
                if self.is_trunk(p) {
                    break;
                }
                current = p;
                steps += 1;
                if steps > self.records.len() {
                    anyhow::bail!("Circular parent reference detected involving '{}'", start);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_context::{init_test_repo, TestRepoContext};
    use tempfile::tempdir;

    fn setup() -> Result<(tempfile::TempDir, git2::Repository)> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        Ok((dir, repo))
    }

    fn create_branch(repo: &git2::Repository, name: &str) -> Result<()> {
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head, false)?;
        Ok(())
    }

    /// main -> a -> b, a -> c
    fn build_forest(repo: &git2::Repository, store: &RefStore) -> Result<()> {
        for b in ["a", "b", "c"] {
            create_branch(repo, b)?;
        }
        store.set_trunk("main")?;
        store.set_parent("a", "main")?;
        store.set_parent("b", "a")?;
        store.set_parent("c", "a")?;
        Ok(())
    }

    #[test]
    fn test_load_and_basic_queries() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;

        let graph = BranchGraph::load(&store)?;
        assert_eq!(graph.trunk(), "main");
        assert_eq!(graph.len(), 3);
        assert!(graph.is_tracked("a"));
        assert!(!graph.is_tracked("main"));
        assert!(graph.is_trunk("main"));
        assert_eq!(graph.parent("b"), Some("a"));
        assert_eq!(graph.children("a"), &["b", "c"]);
        assert_eq!(graph.current_branch(), Some("main"));
        Ok(())
    }

    #[test]
    fn test_tip_covers_trunk_and_tracked() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;

        let graph = BranchGraph::load(&store)?;
        let head = repo.head()?.peel_to_commit()?.id().to_string();
        assert_eq!(graph.tip("main"), Some(head.as_str()));
        assert_eq!(graph.tip("a"), Some(head.as_str()));
        assert_eq!(graph.tip("nope"), None);
        Ok(())
    }

    #[test]
    fn test_downstack_excludes_trunk_and_self() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;

        let graph = BranchGraph::load(&store)?;
        assert_eq!(graph.downstack("b"), vec!["a"]);
        assert!(graph.downstack("a").is_empty());
        Ok(())
    }

    #[test]
    fn test_upstack_bfs_order() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;
        create_branch(&repo, "d")?;
        store.set_parent("d", "b")?;

        let graph = BranchGraph::load(&store)?;
        let upstack = graph.upstack("a");
        let pos = |x: &str| upstack.iter().position(|s| s == x).unwrap();
        assert_eq!(upstack.len(), 3);
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
        Ok(())
    }

    #[test]
    fn test_topological_sort() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;

        let graph = BranchGraph::load(&store)?;
        let sorted = graph.topological_sort(&["b".to_string(), "c".to_string(), "a".to_string()]);
        assert_eq!(sorted[0], "a");
        assert_eq!(sorted.len(), 3);
        Ok(())
    }

    #[test]
    fn test_effective_scope_inheritance() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;
        store.update_metadata("a", |m| m.scope = Some("TCK-9".to_string()))?;

        let graph = BranchGraph::load(&store)?;
        assert_eq!(graph.effective_scope("b"), Some("TCK-9"));
        assert_eq!(graph.effective_scope("a"), Some("TCK-9"));
        Ok(())
    }

    #[test]
    fn test_rebuild_observes_metadata_writes() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;

        let graph = BranchGraph::load(&store)?;
        assert_eq!(graph.parent("c"), Some("a"));

        store.set_parent("c", "b")?;
        // The old graph is a snapshot; a reload sees the write
        let graph2 = BranchGraph::load(&store)?;
        assert_eq!(graph2.parent("c"), Some("b"));
        assert_eq!(graph.parent("c"), Some("a"));
        Ok(())
    }

    #[test]
    fn test_check_invariants_detects_untracked_parent() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        store.set_trunk("main")?;
        create_branch(&repo, "a")?;
        create_branch(&repo, "ghost")?;
        store.set_parent("a", "ghost")?;

        let graph = BranchGraph::load(&store)?;
        let err = graph.check_invariants().unwrap_err().to_string();
        assert!(err.contains("neither trunk nor tracked"), "got: {}", err);
        Ok(())
    }

    #[test]
    fn test_check_invariants_ok_for_forest() -> Result<()> {
        let (dir, repo) = setup()?;
        let _ctx = TestRepoContext::new(dir.path());
        let store = RefStore::new()?;
        build_forest(&repo, &store)?;

        let graph = BranchGraph::load(&store)?;
        graph.check_invariants()?;
        Ok(())
    }
}
