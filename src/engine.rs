//! The stack engine facade.
//!
//! Aggregates the gateway, the metadata store, the snapshot store, and
//! the restack planner behind the operations commands call: track,
//! create, delete, move, undo. Every mutating operation captures a
//! snapshot first, so whatever happens afterwards there is a recoverable
//! path through `st undo`.
//!
//! Commands own the terminal output; engine methods return data.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::git_gateway::GitGateway;
use crate::graph::BranchGraph;
use crate::journal::{Journal, Operation};
use crate::ref_store::RefStore;
use crate::restack::{BatchOutcome, RestackPlanner};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::state::{ContinuationState, OperationKind};
use crate::validation;

pub struct StackEngine {
    pub gateway: GitGateway,
    pub store: RefStore,
    pub config: Config,
    pub trunk: String,
}

impl StackEngine {
    /// Open the engine for the current repository. Fails when the repo has
    /// not been initialized (`st init`).
    pub fn open() -> Result<Self> {
        let gateway = GitGateway::new()?;
        let store = RefStore::new()?;
        let config = Config::load()?;
        let trunk = store.require_trunk()?;

        Ok(Self {
            gateway,
            store,
            config,
            trunk,
        })
    }

    /// Load a fresh graph snapshot.
    pub fn graph(&self) -> Result<BranchGraph> {
        BranchGraph::load(&self.store)
    }

    pub fn snapshot_store(&self) -> SnapshotStore<'_> {
        SnapshotStore::new(&self.store, self.config.snapshot_limit)
    }

    pub fn planner(&self) -> RestackPlanner<'_> {
        RestackPlanner::new(&self.gateway, &self.store, self.trunk.clone())
    }

    /// Capture a snapshot and journal it. Called at the top of every
    /// mutating operation, before the first write.
    pub fn snapshot_before(&self, command: &str, args: &[String]) -> Result<Snapshot> {
        let snapshot = self.snapshot_store().capture(command, args)?;
        Journal::new()?.record(Operation::SnapshotTaken {
            id: snapshot.id.clone(),
            command: command.to_string(),
        })?;
        Ok(snapshot)
    }

    // =========================================================================
    // Track / untrack
    // =========================================================================

    /// Attach metadata to an existing branch. Returns the effective parent.
    pub fn track(&self, branch: &str, parent: Option<&str>, scope: Option<&str>) -> Result<String> {
        if !self.gateway.branch_exists(branch)? {
            anyhow::bail!("Branch '{}' does not exist.", branch);
        }
        validation::require_not_trunk(branch, &self.trunk)?;
        if self.store.is_tracked(branch)? {
            anyhow::bail!("Branch '{}' is already tracked.", branch);
        }

        let parent = parent.unwrap_or(&self.trunk);
        if parent != self.trunk && !self.store.is_tracked(parent)? {
            anyhow::bail!(
                "Parent '{}' is neither trunk nor tracked; track it first.",
                parent
            );
        }

        self.store.register_branch(branch, Some(parent), scope)?;
        Journal::new()?.record(Operation::BranchCreated {
            branch: branch.to_string(),
            parent: Some(parent.to_string()),
        })?;
        Ok(parent.to_string())
    }

    /// Remove a branch's metadata; the git ref stays.
    pub fn untrack(&self, branch: &str) -> Result<()> {
        validation::require_tracked(&self.store, branch)?;
        // Children fall through to this branch's parent so the forest
        // stays rooted at trunk
        self.store.remove_branch_reparent(branch)?;
        Ok(())
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a new stacked branch off the current branch.
    ///
    /// With a message, the branch name comes from the configured pattern
    /// and staged changes are committed; with `stage_all` everything is
    /// staged first.
    pub fn create(
        &self,
        name: Option<String>,
        message: Option<&str>,
        scope: Option<&str>,
        stage_all: bool,
    ) -> Result<String> {
        let current = validation::require_on_branch(&self.gateway)?;
        if current != self.trunk {
            validation::require_tracked(&self.store, &current)?;
        }

        let name = match (name, message) {
            (Some(n), _) => n,
            (None, Some(msg)) => self.config.format_branch_name(&self.username(), msg),
            (None, None) => anyhow::bail!("Provide a branch name or a commit message to derive one from."),
        };

        if self.gateway.branch_exists(&name)? {
            anyhow::bail!("Branch '{}' already exists.", name);
        }

        self.snapshot_before("create", &[name.clone()])?;

        self.gateway.create_and_checkout_branch(&name)?;
        if stage_all {
            self.gateway.stage_all()?;
        }
        if let Some(msg) = message {
            if self.gateway.has_staged_changes()? {
                self.gateway.commit(msg)?;
            }
        }

        // Scope inherits from the parent unless given explicitly
        let effective_scope = match scope {
            Some(s) => Some(s.to_string()),
            None => None,
        };
        self.store
            .register_branch(&name, Some(&current), effective_scope.as_deref())?;

        Journal::new()?.record(Operation::BranchCreated {
            branch: name.clone(),
            parent: Some(current),
        })?;
        Ok(name)
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a tracked branch: restack its children onto its parent,
    /// then drop the metadata and the git ref.
    pub fn delete(&self, branch: &str, force: bool) -> Result<BatchOutcome> {
        validation::require_tracked(&self.store, branch)?;
        validation::require_not_trunk(branch, &self.trunk)?;
        validation::require_no_operation_in_progress(&self.gateway)?;

        if !force {
            let parent = self.store.get_parent(branch)?.unwrap_or_else(|| self.trunk.clone());
            if !self.gateway.is_ancestor(branch, &parent)? {
                anyhow::bail!(
                    "Branch '{}' is not merged into '{}'. Use --force to delete it anyway.",
                    branch,
                    parent
                );
            }
        }

        self.snapshot_before("delete", &[branch.to_string()])?;

        // Move off the branch before deleting it
        let current = self.gateway.get_current_branch_name().ok();
        if current.as_deref() == Some(branch) {
            let parent = self.store.get_parent(branch)?.unwrap_or_else(|| self.trunk.clone());
            self.gateway.checkout_branch(&parent)?;
        }

        // Restack the subtree first: the planner needs this branch's
        // metadata alive to route children to their grandparent
        let descendants = self.store.descendants(branch)?;
        let outcome = if descendants.is_empty() {
            BatchOutcome::default()
        } else {
            let planner = self.planner();
            let original = self
                .gateway
                .get_current_branch_name()
                .unwrap_or_else(|_| self.trunk.clone());
            let mut state = planner.prepare(OperationKind::Restack, &original, &descendants)?;
            state.removed_parents.push(branch.to_string());
            let outcome = planner.run(&mut state)?;
            if outcome.has_conflict() {
                // Deletion completes in `continue` once the batch finishes
                return Ok(outcome);
            }
            outcome
        };

        self.store.remove_metadata(branch)?;
        if self.gateway.branch_exists(branch)? {
            self.gateway.delete_branch(branch)?;
        }

        Journal::new()?.record(Operation::BranchDeleted {
            branch: branch.to_string(),
        })?;
        Ok(outcome)
    }

    /// Finish deletions a conflicted batch left pending: every branch in
    /// `removed_parents` loses its metadata and ref.
    pub fn finish_removals(&self, state: &ContinuationState) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for branch in &state.removed_parents {
            if self.store.is_tracked(branch)? {
                self.store.remove_metadata(branch)?;
            }
            if self.gateway.branch_exists(branch)? {
                if self.gateway.get_current_branch_name().ok().as_deref() == Some(branch.as_str()) {
                    self.gateway.checkout_branch(&self.trunk)?;
                }
                self.gateway.delete_branch(branch)?;
            }
            removed.push(branch.clone());
        }
        Ok(removed)
    }

    // =========================================================================
    // Move
    // =========================================================================

    /// Reparent `source` (and its subtree) onto `onto` and restack.
    pub fn move_onto(&self, source: &str, onto: &str) -> Result<BatchOutcome> {
        validation::require_tracked(&self.store, source)?;
        validation::require_not_trunk(source, &self.trunk)?;
        validation::require_no_operation_in_progress(&self.gateway)?;

        if onto != self.trunk && !self.store.is_tracked(onto)? {
            anyhow::bail!("Target '{}' is neither trunk nor tracked.", onto);
        }
        if onto == source {
            anyhow::bail!("Cannot move '{}' onto itself.", source);
        }
        // Moving onto one's own descendant would fold the stack into a cycle
        if self.store.descendants(source)?.iter().any(|d| d == onto) {
            anyhow::bail!("'{}' is a descendant of '{}'; cannot move a branch under its own subtree.", onto, source);
        }

        self.snapshot_before("move", &[source.to_string(), "--onto".to_string(), onto.to_string()])?;

        let old_parent = self.store.get_parent(source)?;
        let old_parent_name = old_parent.clone().unwrap_or_else(|| self.trunk.clone());
        let old_base = self.gateway.get_branch_sha(&old_parent_name)?;

        self.store.reparent(source, onto)?;

        let mut branches = vec![source.to_string()];
        branches.extend(self.store.descendants(source)?);

        let planner = self.planner();
        let original = self
            .gateway
            .get_current_branch_name()
            .unwrap_or_else(|_| self.trunk.clone());
        let mut state = planner.prepare(OperationKind::Move, &original, &branches)?;
        // The cut point for source's commits is its OLD parent's tip, not
        // anything derived from the new parent
        state.old_bases.insert(onto.to_string(), old_base);

        let outcome = planner.run(&mut state)?;

        Journal::new()?.record(Operation::BranchMoved {
            branch: source.to_string(),
            old_parent,
            new_parent: Some(onto.to_string()),
        })?;
        Ok(outcome)
    }

    // =========================================================================
    // Undo
    // =========================================================================

    /// Snapshots available for undo, oldest first.
    pub fn undo_list(&self) -> Result<Vec<Snapshot>> {
        self.snapshot_store().list()
    }

    /// Restore a snapshot (the latest when `id` is None).
    pub fn undo_restore(&self, id: Option<&str>) -> Result<(Snapshot, crate::snapshot::RestoreReport)> {
        let snapshots = self.snapshot_store();
        let snapshot = match id {
            Some(id) => snapshots
                .get(id)?
                .with_context(|| format!("Snapshot '{}' not found", id))?,
            None => snapshots
                .latest()?
                .context("No snapshots recorded yet; nothing to undo.")?,
        };

        let report = snapshots.restore(&snapshot)?;
        Journal::new()?.record(Operation::SnapshotRestored {
            id: snapshot.id.clone(),
        })?;
        Ok((snapshot, report))
    }

    /// Username for branch-name templates: git user.name, slugified, with
    /// $USER as fallback.
    pub fn username(&self) -> String {
        if let Ok(name) = self.gateway.run_git_stdout(&["config", "user.name"]) {
            let slug = crate::config::slugify(&name);
            if !slug.is_empty() {
                return slug;
            }
        }
        std::env::var("USER").unwrap_or_else(|_| "dev".to_string())
    }
}
