//! Merge plan construction and validation.

use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;

use crate::forge::{ChecksStatus, PrRecord, PrState};
use crate::git_gateway::RemoteDivergence;
use crate::graph::BranchGraph;

/// One step of a merge plan. The step vocabulary is closed; strategies
/// differ only in how they sequence these.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStep {
    /// Poll CI on a branch's PR until all required checks finish
    WaitCi { branch: String, pr: u64 },
    /// Merge the PR on the remote (ordinary merge commit)
    MergePr { branch: String, pr: u64 },
    /// Fetch and fast-forward trunk to the remote
    PullTrunk,
    /// Re-anchor a branch onto its (possibly new) parent
    Restack { branch: String },
    /// Point a PR's base at a different branch
    UpdatePrBase { branch: String, base: String },
    /// Delete a merged local branch and its metadata
    DeleteBranch { branch: String },
    /// Build a throwaway branch merging the named branches with --no-ff,
    /// push it, and open a single consolidation PR
    Consolidate { branches: Vec<String> },
}

impl fmt::Display for MergeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStep::WaitCi { branch, .. } => write!(f, "wait for CI on {}", branch),
            MergeStep::MergePr { branch, pr } => write!(f, "merge PR #{} ({})", pr, branch),
            MergeStep::PullTrunk => write!(f, "pull trunk"),
            MergeStep::Restack { branch } => write!(f, "restack {}", branch),
            MergeStep::UpdatePrBase { branch, base } => write!(f, "retarget PR of {} to {}", branch, base),
            MergeStep::DeleteBranch { branch } => write!(f, "delete {}", branch),
            MergeStep::Consolidate { branches } => write!(f, "consolidate {} branches", branches.len()),
        }
    }
}

/// How the stack reaches the trunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// Merge each PR oldest-first, pulling trunk and restacking between
    #[default]
    BottomUp,
    /// Collapse the stack into the top PR and merge once
    TopDown,
    /// Merge all branches into one consolidation PR (individual PRs
    /// auto-close via the --no-ff merges)
    Consolidate,
}

impl std::str::FromStr for MergeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bottom-up" => Ok(MergeStrategy::BottomUp),
            "top-down" => Ok(MergeStrategy::TopDown),
            "consolidate" => Ok(MergeStrategy::Consolidate),
            _ => Err(format!(
                "Unknown merge strategy '{}' (expected bottom-up, top-down, or consolidate)",
                s
            )),
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::BottomUp => write!(f, "bottom-up"),
            MergeStrategy::TopDown => write!(f, "top-down"),
            MergeStrategy::Consolidate => write!(f, "consolidate"),
        }
    }
}

/// An ordered, validated plan
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub strategy: MergeStrategy,
    /// Branches that will actually merge, downstack (oldest) first
    pub branches: Vec<String>,
    pub steps: Vec<MergeStep>,
    /// Advisory findings that did not block planning
    pub warnings: Vec<String>,
    /// Informational findings (e.g. sibling reparenting)
    pub notices: Vec<String>,
}

/// Everything the planner needs about the world, gathered by the caller
/// before planning (PR lookups and CI reads are remote calls).
pub struct PlanContext {
    /// PR for each branch in the selection, if one exists
    pub prs: BTreeMap<String, PrRecord>,
    /// CI status for each branch, where known
    pub checks: BTreeMap<String, ChecksStatus>,
    /// Local/remote relation for each branch, where known
    pub divergence: BTreeMap<String, RemoteDivergence>,
}

pub struct MergePlanner<'a> {
    graph: &'a BranchGraph,
}

impl<'a> MergePlanner<'a> {
    pub fn new(graph: &'a BranchGraph) -> Self {
        Self { graph }
    }

    /// Validate a selection and build the step plan.
    ///
    /// `selection` must be a downstack-ordered chain (oldest first), as
    /// produced by walking the current branch's ancestors.
    pub fn plan(
        &self,
        strategy: MergeStrategy,
        selection: &[String],
        ctx: &PlanContext,
        force: bool,
    ) -> Result<MergePlan> {
        let mut warnings = Vec::new();
        let mut notices = Vec::new();
        let mut branches = Vec::new();

        for branch in selection {
            if self.graph.is_trunk(branch) {
                anyhow::bail!("Cannot merge trunk branch '{}'", branch);
            }
            if !self.graph.is_tracked(branch) {
                anyhow::bail!("Branch '{}' is not tracked; track it before merging.", branch);
            }

            let pr = match ctx.prs.get(branch) {
                Some(pr) => pr,
                None => anyhow::bail!("Branch '{}' has no PR. Run 'st submit' first.", branch),
            };

            match pr.state {
                PrState::Merged | PrState::Closed => {
                    // Already handled remotely; drop from the selection
                    notices.push(format!(
                        "PR #{} ({}) is already {}, skipping",
                        pr.number.unwrap_or(0),
                        branch,
                        pr.state
                    ));
                    continue;
                }
                PrState::Open => {}
            }

            if pr.number.is_none() {
                anyhow::bail!("Branch '{}' has a PR record without a number; re-run 'st submit'.", branch);
            }

            if pr.draft {
                let msg = format!("PR #{} ({}) is a draft", pr.number.unwrap_or(0), branch);
                if force {
                    warnings.push(msg);
                } else {
                    anyhow::bail!("{}. Mark it ready or pass --force.", msg);
                }
            }

            if let Some(divergence) = ctx.divergence.get(branch) {
                match divergence {
                    RemoteDivergence::InSync | RemoteDivergence::NoRemote => {}
                    other => {
                        let msg = format!("Branch '{}' differs from its remote ({})", branch, other);
                        if force {
                            warnings.push(msg);
                        } else {
                            anyhow::bail!("{}. Run 'st submit' to push, or pass --force.", msg);
                        }
                    }
                }
            }

            if let Some(checks) = ctx.checks.get(branch) {
                if !checks.is_empty() && !checks.passing {
                    let msg = if checks.pending {
                        format!("CI is still pending on '{}'", branch)
                    } else {
                        format!("CI is failing on '{}' ({})", branch, checks.failing().join(", "))
                    };
                    if force {
                        warnings.push(msg);
                    } else {
                        anyhow::bail!("{}. Pass --force to plan anyway; the executor still waits on CI.", msg);
                    }
                }
            }

            branches.push(branch.clone());
        }

        if branches.is_empty() {
            anyhow::bail!("Nothing to merge: every selected branch was already merged or closed.");
        }

        // Siblings of merging branches that are not themselves merging will
        // be reparented when their parent goes away
        for branch in &branches {
            for child in self.graph.children(branch) {
                if !branches.contains(child) && !selection.contains(child) {
                    notices.push(format!(
                        "'{}' will be reparented onto '{}' after '{}' merges",
                        child,
                        self.graph.trunk(),
                        branch
                    ));
                }
            }
        }

        let steps = match strategy {
            MergeStrategy::BottomUp => self.build_bottom_up(&branches, ctx),
            MergeStrategy::TopDown => self.build_top_down(&branches, ctx),
            MergeStrategy::Consolidate => self.build_consolidate(&branches),
        };

        Ok(MergePlan {
            strategy,
            branches,
            steps,
            warnings,
            notices,
        })
    }

    fn pr_number(ctx: &PlanContext, branch: &str) -> u64 {
        ctx.prs
            .get(branch)
            .and_then(|pr| pr.number)
            .expect("validated selection has PR numbers")
    }

    /// Branches strictly above the merged set that survive it, in
    /// parents-first order
    fn remaining_upstack(&self, merged: &[String]) -> Vec<String> {
        let top = match merged.last() {
            Some(t) => t,
            None => return Vec::new(),
        };
        self.graph
            .upstack(top)
            .into_iter()
            .filter(|b| !merged.contains(b))
            .collect()
    }

    fn build_bottom_up(&self, branches: &[String], ctx: &PlanContext) -> Vec<MergeStep> {
        let trunk = self.graph.trunk().to_string();
        let mut steps = Vec::new();

        for (i, branch) in branches.iter().enumerate() {
            let pr = Self::pr_number(ctx, branch);
            steps.push(MergeStep::WaitCi {
                branch: branch.clone(),
                pr,
            });
            steps.push(MergeStep::MergePr {
                branch: branch.clone(),
                pr,
            });
            steps.push(MergeStep::PullTrunk);
            if let Some(next) = branches.get(i + 1) {
                // Rebase the next candidate onto the fast-forwarded trunk so
                // its merge (and CI) run against fresh history
                steps.push(MergeStep::Restack { branch: next.clone() });
            }
        }

        // Children of the last merged branch move their PR base to trunk.
        // Children deeper in the surviving stack keep their bases: the
        // intermediate base still points at its actual parent.
        if let Some(top) = branches.last() {
            for child in self.graph.children(top) {
                if !branches.contains(child) {
                    steps.push(MergeStep::UpdatePrBase {
                        branch: child.clone(),
                        base: trunk.clone(),
                    });
                }
            }
        }

        for branch in branches {
            steps.push(MergeStep::DeleteBranch { branch: branch.clone() });
        }

        for branch in self.remaining_upstack(branches) {
            steps.push(MergeStep::Restack { branch });
        }

        steps
    }

    fn build_top_down(&self, branches: &[String], ctx: &PlanContext) -> Vec<MergeStep> {
        let trunk = self.graph.trunk().to_string();
        let top = branches.last().expect("validated non-empty selection").clone();
        let pr = Self::pr_number(ctx, &top);
        let mut steps = Vec::new();

        // The top branch is rebased onto trunk carrying the whole stack's
        // commits; its PR then represents everything below it
        steps.push(MergeStep::Restack { branch: top.clone() });
        steps.push(MergeStep::UpdatePrBase {
            branch: top.clone(),
            base: trunk,
        });
        steps.push(MergeStep::WaitCi {
            branch: top.clone(),
            pr,
        });
        steps.push(MergeStep::MergePr {
            branch: top.clone(),
            pr,
        });
        steps.push(MergeStep::PullTrunk);

        for branch in branches {
            steps.push(MergeStep::DeleteBranch { branch: branch.clone() });
        }

        for branch in self.remaining_upstack(branches) {
            steps.push(MergeStep::Restack { branch });
        }

        steps
    }

    fn build_consolidate(&self, branches: &[String]) -> Vec<MergeStep> {
        let mut steps = Vec::new();
        let consolidation = consolidation_branch_name(branches);

        steps.push(MergeStep::Consolidate {
            branches: branches.to_vec(),
        });
        // PR number 0 is a placeholder the executor resolves after the
        // consolidation PR exists
        steps.push(MergeStep::WaitCi {
            branch: consolidation.clone(),
            pr: 0,
        });
        steps.push(MergeStep::MergePr {
            branch: consolidation,
            pr: 0,
        });
        steps.push(MergeStep::PullTrunk);

        for branch in branches {
            steps.push(MergeStep::DeleteBranch { branch: branch.clone() });
        }

        for branch in self.remaining_upstack(branches) {
            steps.push(MergeStep::Restack { branch });
        }

        steps
    }
}

/// Name of the throwaway consolidation branch for a selection
pub(crate) fn consolidation_branch_name(branches: &[String]) -> String {
    let first = branches.first().map(String::as_str).unwrap_or("stack");
    let last = branches.last().map(String::as_str).unwrap_or("stack");
    format!("consolidate/{}-{}", crate::config::slugify(first), crate::config::slugify(last))
}
