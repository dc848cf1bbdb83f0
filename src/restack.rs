//! The restack planner.
//!
//! Restacking re-anchors a branch's commits onto its parent's current tip.
//! For a batch of branches the planner processes parents before children,
//! so each branch sees its parent's new tip, and records every touched
//! branch's pre-batch tip: a child rebased after its parent needs the
//! parent's OLD tip as the cut point for `git rebase --onto`.
//!
//! Per branch the planner resolves, in order:
//! 1. a parent marked removed in this batch → reparent to the nearest
//!    surviving ancestor (trunk in the worst case),
//! 2. merge base already at the parent tip → `Unneeded`,
//! 3. no commits of its own → fast-forward pointer move, no rebase,
//! 4. unique patches all present in the new parent by patch-id (a
//!    squash-and-merge landed upstream) → pointer move, marker recorded,
//! 5. otherwise a real rebase, which either completes or stops on
//!    conflicts.
//!
//! On the first conflict the working copy is left in the conflicted state,
//! the continuation (remaining branches, recorded old bases, original
//! HEAD) is persisted, and the batch stops. `resume` picks up from the
//! conflicted branch after resolution. A failure that is not a conflict
//! aborts the rebase and clears the continuation; metadata mutations
//! already applied (reparenting) are kept, and the caller decides whether
//! to restore the pre-operation snapshot.

use anyhow::{Context, Result};
use std::collections::HashSet;

use crate::git_gateway::GitGateway;
use crate::ref_store::RefStore;
use crate::state::{ContinuationState, OperationKind};

/// Result of restacking one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestackOutcome {
    /// Commits re-anchored; `new_parent` is the effective parent after any
    /// reparenting, so callers can update PR bases
    Done { new_parent: String },
    /// Already based on the parent tip; nothing to do
    Unneeded,
    /// Rebase stopped on unmerged paths; continuation persisted
    Conflict,
}

/// Per-branch outcome within a batch
#[derive(Debug, Clone)]
pub struct BranchRestack {
    pub branch: String,
    pub outcome: RestackOutcome,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<BranchRestack>,
    /// Set when the batch stopped on a conflict; untouched branches stay in
    /// the persisted continuation
    pub conflict_branch: Option<String>,
}

impl BatchOutcome {
    pub fn has_conflict(&self) -> bool {
        self.conflict_branch.is_some()
    }

    /// Branches that actually moved (rebase or pointer move)
    pub fn completed(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, RestackOutcome::Done { .. }))
            .map(|r| r.branch.as_str())
            .collect()
    }
}

pub struct RestackPlanner<'a> {
    gateway: &'a GitGateway,
    store: &'a RefStore,
    trunk: String,
}

impl<'a> RestackPlanner<'a> {
    pub fn new(gateway: &'a GitGateway, store: &'a RefStore, trunk: String) -> Self {
        Self {
            gateway,
            store,
            trunk,
        }
    }

    /// Build the continuation for a batch: branches ordered parents-first,
    /// pre-batch tips recorded for every branch the batch will read.
    pub fn prepare(
        &self,
        kind: OperationKind,
        original_branch: &str,
        branches: &[String],
    ) -> Result<ContinuationState> {
        let ordered = self.store.topological_sort(branches)?;
        let mut state = ContinuationState::new(kind, original_branch.to_string(), ordered.clone());

        let mut record = |state: &mut ContinuationState, name: &str| -> Result<()> {
            if !state.old_bases.contains_key(name) && self.gateway.branch_exists(name)? {
                let sha = self.gateway.get_branch_sha(name)?;
                state.old_bases.insert(name.to_string(), sha);
            }
            Ok(())
        };

        record(&mut state, &self.trunk.clone())?;
        for branch in &ordered {
            record(&mut state, branch)?;
            if let Some(parent) = self.store.get_parent(branch)? {
                record(&mut state, &parent)?;
            }
        }

        Ok(state)
    }

    /// Run the batch from the continuation's current position.
    ///
    /// Saves a checkpoint before every rebase so a crash at any point
    /// resumes cleanly.
    pub fn run(&self, state: &mut ContinuationState) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        while let Some(branch) = state.remaining_branches.first().cloned() {
            state.current_branch = Some(branch.clone());
            state.save()?;

            let result = match self.restack_one(&branch, state) {
                Ok(r) => r,
                Err(e) => {
                    // Not a conflict: abort whatever rebase is half-done and
                    // drop the continuation. Reparenting already written to
                    // metadata is kept.
                    if self.gateway.rebase_in_progress().unwrap_or(false) {
                        self.gateway.rebase_abort().ok();
                    }
                    ContinuationState::clear().ok();
                    return Err(e);
                }
            };

            match result {
                RestackOutcome::Conflict => {
                    state.save()?;
                    outcome.results.push(BranchRestack {
                        branch: branch.clone(),
                        outcome: RestackOutcome::Conflict,
                    });
                    outcome.conflict_branch = Some(branch);
                    return Ok(outcome);
                }
                other => {
                    state.remaining_branches.remove(0);
                    state.completed_branches.push(branch.clone());
                    state.current_branch = None;
                    outcome.results.push(BranchRestack { branch, outcome: other });
                }
            }
        }

        state.in_progress = false;
        ContinuationState::clear()?;
        Ok(outcome)
    }

    /// Resume after a conflict was resolved: continue the git rebase, mark
    /// the conflicted branch done, and process the remainder of the batch.
    pub fn resume(&self, state: &mut ContinuationState) -> Result<BatchOutcome> {
        if self.gateway.rebase_in_progress()? {
            let rebase = self.gateway.rebase_continue()?;
            if rebase.has_conflicts() {
                return Ok(BatchOutcome {
                    results: vec![BranchRestack {
                        branch: state.current_branch.clone().unwrap_or_default(),
                        outcome: RestackOutcome::Conflict,
                    }],
                    conflict_branch: state.current_branch.clone(),
                });
            }
        }

        let mut resumed = Vec::new();
        if let Some(current) = state.current_branch.take() {
            if state.remaining_branches.first() == Some(&current) {
                state.remaining_branches.remove(0);
            }
            state.completed_branches.push(current.clone());
            state.save()?;
            resumed.push(BranchRestack {
                branch: current.clone(),
                outcome: RestackOutcome::Done {
                    new_parent: self
                        .store
                        .get_parent(&current)?
                        .unwrap_or_else(|| self.trunk.clone()),
                },
            });
        }

        let mut outcome = self.run(state)?;
        resumed.extend(outcome.results);
        outcome.results = resumed;
        Ok(outcome)
    }

    /// The parent a branch should restack onto, skipping parents marked
    /// removed in this batch. Reparents metadata when the effective parent
    /// differs from the recorded one.
    fn effective_parent(&self, branch: &str, state: &ContinuationState) -> Result<(String, String)> {
        let recorded = self
            .store
            .get_parent(branch)?
            .unwrap_or_else(|| self.trunk.clone());

        let mut parent = recorded.clone();
        let mut seen = HashSet::new();
        while state.removed_parents.contains(&parent) && parent != self.trunk {
            if !seen.insert(parent.clone()) {
                anyhow::bail!("Circular parent reference detected at '{}'", parent);
            }
            parent = self
                .store
                .get_parent(&parent)?
                .unwrap_or_else(|| self.trunk.clone());
        }

        if parent != recorded {
            self.store.reparent(branch, &parent)?;
        }

        Ok((recorded, parent))
    }

    /// The cut point for the branch's own commits: the recorded pre-batch
    /// tip of its (original) parent when that tip is still an ancestor of
    /// the branch, otherwise the merge base (covers a parent amended
    /// outside any batch).
    fn old_base(&self, branch: &str, recorded_parent: &str, parent: &str, state: &ContinuationState) -> Result<String> {
        if let Some(old_tip) = state.old_bases.get(recorded_parent) {
            if self.gateway.is_ancestor(old_tip, branch)? {
                return Ok(old_tip.clone());
            }
        }
        self.gateway
            .merge_base(branch, parent)
            .context(format!("No common history between '{}' and '{}'", branch, parent))
    }

    fn restack_one(&self, branch: &str, state: &ContinuationState) -> Result<RestackOutcome> {
        if !self.gateway.branch_exists(branch)? {
            anyhow::bail!(
                "Branch '{}' is tracked but does not exist in git. Re-track or delete it first.",
                branch
            );
        }

        let (recorded_parent, parent) = self.effective_parent(branch, state)?;
        let parent_tip = self.gateway.get_branch_sha(&parent)?;
        let branch_tip = self.gateway.get_branch_sha(branch)?;

        // Already anchored at the parent tip
        if self.gateway.merge_base(branch, &parent)? == parent_tip {
            self.store.update_metadata(branch, |m| m.fast_forward_fixed = true).ok();
            return Ok(RestackOutcome::Unneeded);
        }

        let old_base = self.old_base(branch, &recorded_parent, &parent, state)?;

        // No commits of its own: a pointer move suffices
        if branch_tip == old_base {
            self.gateway.set_branch_sha(branch, &parent_tip)?;
            self.store.update_metadata(branch, |m| {
                m.fast_forward_fixed = true;
                m.squashed_merge_fixed = false;
            })?;
            return Ok(RestackOutcome::Done { new_parent: parent });
        }

        // The branch's unique patches may already be in the new parent
        // (squash-and-merge of an ancestor landed upstream): compare
        // patch-ids instead of SHAs, then degrade the rebase to a pointer
        // move.
        let branch_range = format!("{}..{}", old_base, branch);
        let merge_base = self.gateway.merge_base(branch, &parent)?;
        let parent_range = format!("{}..{}", merge_base, parent);
        if self.gateway.patches_subsumed_by(&branch_range, &parent_range)? {
            self.gateway.set_branch_sha(branch, &parent_tip)?;
            self.store.update_metadata(branch, |m| {
                m.squashed_merge_fixed = true;
                m.fast_forward_fixed = false;
            })?;
            return Ok(RestackOutcome::Done { new_parent: parent });
        }

        match self.gateway.rebase_onto_from(branch, &parent_tip, &old_base)? {
            crate::git_gateway::RebaseOutcome::Success => {
                self.store.update_metadata(branch, |m| {
                    m.squashed_merge_fixed = false;
                    m.fast_forward_fixed = false;
                })?;
                Ok(RestackOutcome::Done { new_parent: parent })
            }
            crate::git_gateway::RebaseOutcome::Conflicts => Ok(RestackOutcome::Conflict),
        }
    }
}
