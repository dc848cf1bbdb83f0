//! The absorb engine.
//!
//! Absorb routes each staged hunk to the most recent ancestor commit that
//! *depends on* it — the newest commit whose own changes to the file do
//! not commute with the hunk — and amends that commit in place via a
//! fixup commit folded by an autosquash rebase.
//!
//! Commutation is decided by line-range overlap: a commit commutes with a
//! hunk unless the commit's added line ranges for the file intersect the
//! lines the hunk removes. The candidate walk runs newest-to-oldest from
//! the current branch down the stack and terminates at trunk or at the
//! first branch outside the current branch's scope.
//!
//! Before any branch is touched the entire working state (staged and
//! unstaged) is stashed; the stash is restored on every exit path. The
//! one exception is a conflict during the follow-up restack, where the
//! stash entry is deliberately kept for the user to pop after resolving.

mod plan;

pub use plan::{AbsorbPlan, HunkTarget};

use anyhow::{Context, Result};

use crate::git_gateway::{GitGateway, StashGuard};
use crate::ref_store::RefStore;
use crate::restack::RestackPlanner;
use crate::state::OperationKind;

/// What an absorb application did
#[derive(Debug, Default)]
pub struct AbsorbReport {
    /// Branches whose commits were amended, downstack order
    pub modified_branches: Vec<String>,
    /// Number of hunks folded into history
    pub absorbed_hunks: usize,
    /// Hunks no candidate commit depended on; left in the working tree
    pub unabsorbable_hunks: usize,
    /// Set when the follow-up restack stopped on a conflict
    pub conflict_branch: Option<String>,
}

pub struct AbsorbEngine<'a> {
    gateway: &'a GitGateway,
    store: &'a RefStore,
    trunk: String,
}

impl<'a> AbsorbEngine<'a> {
    pub fn new(gateway: &'a GitGateway, store: &'a RefStore, trunk: String) -> Self {
        Self {
            gateway,
            store,
            trunk,
        }
    }

    /// Compute the hunk→commit assignment for the staged changes.
    ///
    /// Pure analysis: no mutation, usable directly for dry runs.
    pub fn plan(&self, current_branch: &str) -> Result<AbsorbPlan> {
        let hunks = self.gateway.staged_hunks()?;
        let candidates = self.candidate_commits(current_branch)?;
        plan::assign_targets(self.gateway, hunks, &candidates)
    }

    /// Candidate commits newest-to-oldest: the current branch's own
    /// commits first, then each ancestor branch's, stopping at trunk or at
    /// the first branch whose effective scope differs from the current
    /// branch's.
    fn candidate_commits(&self, current_branch: &str) -> Result<Vec<(String, String)>> {
        let scope = self.store.effective_scope(current_branch)?;

        let mut chain = vec![current_branch.to_string()];
        let mut walk = current_branch.to_string();
        loop {
            let parent = match self.store.get_parent(&walk)? {
                Some(p) => p,
                None => break,
            };
            if parent == self.trunk || !self.store.is_tracked(&parent)? {
                break;
            }
            if let Some(scope) = &scope {
                // The walk is bounded by the scope: the first ancestor
                // outside it ends the candidate list
                if self.store.effective_scope(&parent)?.as_deref() != Some(scope) {
                    break;
                }
            }
            chain.push(parent.clone());
            walk = parent;
        }

        let mut candidates = Vec::new();
        for branch in &chain {
            let parent = self
                .store
                .get_parent(branch)?
                .unwrap_or_else(|| self.trunk.clone());
            let range = format!("{}..{}", parent, branch);
            for sha in self.gateway.rev_list(&range)? {
                candidates.push((sha, branch.clone()));
            }
        }

        Ok(candidates)
    }

    /// Apply a plan: fold each hunk into its target commit and restack
    /// everything above the deepest modified branch.
    pub fn apply(&self, plan: &AbsorbPlan, current_branch: &str) -> Result<AbsorbReport> {
        let mut report = AbsorbReport {
            unabsorbable_hunks: plan.unabsorbable.len(),
            ..Default::default()
        };

        if plan.targets.is_empty() {
            return Ok(report);
        }

        let mut guard = StashGuard::push(self.gateway, "absorb")?;

        let groups = plan.groups();

        // Record every target branch's tip before rewriting it: descendants
        // are still based on these, and the follow-up restack must cut
        // their commit ranges there
        let mut pre_tips = std::collections::BTreeMap::new();
        for group in &groups {
            pre_tips.insert(group.branch.clone(), self.gateway.get_branch_sha(&group.branch)?);
        }

        let amend_result = (|| -> Result<()> {
            for group in &groups {
                self.amend_branch(&group.branch, &group.commits)?;
                report.modified_branches.push(group.branch.clone());
                report.absorbed_hunks += group.commits.iter().map(|(_, hunks)| hunks.len()).sum::<usize>();
            }
            Ok(())
        })();

        if let Err(e) = amend_result {
            // Guard drop restores the stash; half-applied fixups were
            // aborted inside amend_branch
            self.gateway.checkout_branch(current_branch).ok();
            return Err(e);
        }

        // Restack descendants of the deepest modified branch so the whole
        // stack observes the amended history
        let deepest = self.deepest_branch(&report.modified_branches)?;
        let descendants = self.store.descendants(&deepest)?;
        if !descendants.is_empty() {
            let planner = RestackPlanner::new(self.gateway, self.store, self.trunk.clone());
            let mut state = planner.prepare(OperationKind::Absorb, current_branch, &descendants)?;
            for (branch, tip) in &pre_tips {
                state.old_bases.insert(branch.clone(), tip.clone());
            }
            let outcome = planner.run(&mut state)?;
            if let Some(conflicted) = outcome.conflict_branch {
                // Leave the conflict for the user; keep the stash entry
                // rather than popping it over a conflicted tree
                report.conflict_branch = Some(conflicted);
                guard.disarm();
                return Ok(report);
            }
        }

        self.gateway
            .checkout_branch(current_branch)
            .context("Failed to return to the original branch")?;
        guard.restore()?;
        Ok(report)
    }

    /// Amend one branch: stage each commit's hunks, create fixup commits,
    /// then fold them with a single autosquash rebase over the branch's
    /// commit range.
    fn amend_branch(&self, branch: &str, commits: &[(String, Vec<plan::HunkTarget>)]) -> Result<()> {
        self.gateway.checkout_branch(branch)?;

        let fixup_result = (|| -> Result<()> {
            for (commit, targets) in commits {
                let mut patch = String::new();
                for t in targets {
                    patch.push_str(&t.hunk.to_patch());
                }
                self.gateway
                    .apply_cached(&patch, true)
                    .with_context(|| format!("Failed to apply hunks destined for {}", &commit[..7.min(commit.len())]))?;
                self.gateway.commit_fixup(commit)?;
            }
            Ok(())
        })();

        if let Err(e) = fixup_result {
            // Drop any staged but uncommitted hunks so the guard's stash
            // pop starts from a clean tree
            self.gateway.run_git_success(&["reset", "--hard", "HEAD"]).ok();
            return Err(e);
        }

        let parent = self
            .store
            .get_parent(branch)?
            .unwrap_or_else(|| self.trunk.clone());
        let base = self.gateway.get_branch_sha(&parent)?;

        let outcome = self.gateway.rebase_autosquash(branch, &base)?;
        if outcome.has_conflicts() {
            // A fixup that conflicts with intervening commits means the
            // commutation analysis was wrong for this hunk; undo rather
            // than hand the user a rebase inside an absorb
            self.gateway.rebase_abort()?;
            anyhow::bail!(
                "Folding fixups into '{}' conflicted; the staged changes were left untouched.",
                branch
            );
        }

        Ok(())
    }

    /// The modified branch closest to trunk (everything above it restacks)
    fn deepest_branch(&self, branches: &[String]) -> Result<String> {
        let mut best = branches[0].clone();
        let mut best_depth = usize::MAX;
        for branch in branches {
            let depth = self.store.ancestors(branch)?.len();
            if depth < best_depth {
                best_depth = depth;
                best = branch.clone();
            }
        }
        Ok(best)
    }
}
