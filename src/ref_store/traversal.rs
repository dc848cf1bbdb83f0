//! Traversal and listing operations for RefStore.

use anyhow::Result;
use std::collections::{HashSet, VecDeque};

use super::{RefStore, META_REF_PREFIX};

/// Maximum depth for walking the parent chain (guards against cycles the
/// cycle check missed and pathological metadata)
const MAX_ANCESTOR_DEPTH: usize = 1000;

/// Maximum depth for descendant traversal
const MAX_TRAVERSAL_DEPTH: usize = 1000;

impl RefStore {
    /// All tracked branches (those with a metadata record), sorted
    pub fn list_tracked_branches(&self) -> Result<Vec<String>> {
        let mut branches = Vec::new();

        let pattern = format!("{}*", META_REF_PREFIX);
        for (ref_name, _) in self.gateway.list_references(&pattern)? {
            if let Some(branch) = ref_name.strip_prefix(META_REF_PREFIX) {
                branches.push(branch.to_string());
            }
        }

        branches.sort();
        Ok(branches)
    }

    /// Ancestors of a branch, ordered trunk-side first, branch last.
    ///
    /// The first element is the direct child of trunk and the last is the
    /// branch itself; trunk is not included.
    pub fn ancestors(&self, branch: &str) -> Result<Vec<String>> {
        let trunk = self.require_trunk()?;

        let mut result = vec![branch.to_string()];
        let mut current = branch.to_string();
        let mut seen = HashSet::new();
        seen.insert(current.clone());

        while let Some(parent) = self.get_parent(&current)? {
            if parent == trunk {
                break;
            }

            if !seen.insert(parent.clone()) {
                anyhow::bail!("Circular parent reference detected: {} -> ... -> {}", branch, parent);
            }
            if result.len() >= MAX_ANCESTOR_DEPTH {
                anyhow::bail!("Parent chain exceeds maximum depth ({})", MAX_ANCESTOR_DEPTH);
            }

            result.push(parent.clone());
            current = parent;
        }

        result.reverse();
        Ok(result)
    }

    /// All descendants of a branch in BFS order (parents before children).
    ///
    /// The branch itself is not included. Siblings come out sorted, which
    /// makes the order deterministic; sibling order carries no meaning.
    pub fn descendants(&self, branch: &str) -> Result<Vec<String>> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for child in self.get_children(branch)? {
            queue.push_back((child, 1));
        }

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= MAX_TRAVERSAL_DEPTH {
                anyhow::bail!("Descendant traversal exceeds maximum depth ({})", MAX_TRAVERSAL_DEPTH);
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            for child in self.get_children(&current)? {
                queue.push_back((child, depth + 1));
            }
        }

        Ok(result)
    }

    /// Collect branches in DFS preorder starting from the given roots.
    ///
    /// Parents always precede their children, which is the order a batch
    /// restack needs.
    pub fn collect_branches_dfs(&self, roots: &[String]) -> Result<Vec<String>> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for root in roots {
            self.collect_dfs_recursive(root, &mut result, &mut visited, 0)?;
        }

        Ok(result)
    }

    fn collect_dfs_recursive(
        &self,
        branch: &str,
        result: &mut Vec<String>,
        visited: &mut HashSet<String>,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_TRAVERSAL_DEPTH {
            anyhow::bail!(
                "Stack traversal exceeds maximum depth ({}). \
                 This may indicate corrupted metadata or an extremely deep stack.",
                MAX_TRAVERSAL_DEPTH
            );
        }

        if !visited.insert(branch.to_string()) {
            return Ok(());
        }
        result.push(branch.to_string());

        for child in self.get_children(branch)? {
            self.collect_dfs_recursive(&child, result, visited, depth + 1)?;
        }

        Ok(())
    }

    /// Sort a set of tracked branches so that every parent precedes its
    /// children. Branches whose parent is outside the set sort first, in
    /// name order.
    pub fn topological_sort(&self, branches: &[String]) -> Result<Vec<String>> {
        let set: HashSet<&String> = branches.iter().collect();
        let mut result = Vec::with_capacity(branches.len());
        let mut placed: HashSet<String> = HashSet::new();

        // Roots: branches whose parent is not in the set
        let mut roots: Vec<String> = Vec::new();
        for b in branches {
            let parent = self.get_parent(b)?;
            match parent {
                Some(p) if set.contains(&p) => {}
                _ => roots.push(b.clone()),
            }
        }
        roots.sort();

        let mut queue: VecDeque<String> = roots.into();
        while let Some(current) = queue.pop_front() {
            if !placed.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            let mut next: Vec<String> = self
                .get_children(&current)?
                .into_iter()
                .filter(|c| set.contains(c) && !placed.contains(c))
                .collect();
            next.sort();
            for child in next {
                queue.push_back(child);
            }
        }

        if result.len() != branches.len() {
            anyhow::bail!(
                "Topological sort could not place every branch; the parent relation may contain a cycle."
            );
        }

        Ok(result)
    }
}
