//! Merge plan execution.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::forge::{wait_for_checks, CiWaitConfig, CiWaitResult, Forge, MergeMethod, PrState, PrUpdate};
use crate::git_gateway::{GitGateway, RebaseOutcome};
use crate::program_name::program_name;
use crate::ref_store::RefStore;
use crate::restack::RestackPlanner;
use crate::state::{ContinuationState, OperationKind};
use crate::worktree::WorktreeGuard;

use super::plan::{consolidation_branch_name, MergePlan, MergeStep, MergeStrategy};

/// Progress sink for plan execution.
pub trait StepReporter {
    fn step_start(&self, index: usize, total: usize, step: &MergeStep);
    fn step_done(&self, step: &MergeStep);
    fn step_skipped(&self, step: &MergeStep, reason: &str);
    fn step_failed(&self, step: &MergeStep, err: &anyhow::Error);
    fn info(&self, msg: &str);
}

/// Reporter printing step progress to the terminal.
pub struct ConsoleReporter;

impl StepReporter for ConsoleReporter {
    fn step_start(&self, index: usize, total: usize, step: &MergeStep) {
        println!("{} [{}/{}] {}...", "→".blue(), index + 1, total, step);
    }

    fn step_done(&self, step: &MergeStep) {
        println!("  {} {}", "✓".green(), step);
    }

    fn step_skipped(&self, step: &MergeStep, reason: &str) {
        println!("  {} {} ({})", "•".dimmed(), step, reason.dimmed());
    }

    fn step_failed(&self, step: &MergeStep, err: &anyhow::Error) {
        eprintln!("  {} {} failed: {:#}", "✗".red(), step, err);
    }

    fn info(&self, msg: &str) {
        println!("  {} {}", "ℹ".blue(), msg);
    }
}

/// Silent reporter for tests and worktree inner runs.
pub struct QuietReporter;

impl StepReporter for QuietReporter {
    fn step_start(&self, _index: usize, _total: usize, _step: &MergeStep) {}
    fn step_done(&self, _step: &MergeStep) {}
    fn step_skipped(&self, _step: &MergeStep, _reason: &str) {}
    fn step_failed(&self, _step: &MergeStep, _err: &anyhow::Error) {}
    fn info(&self, _msg: &str) {}
}

/// What a (possibly partial) execution accomplished.
#[derive(Debug, Default)]
pub struct MergeExecution {
    pub completed_steps: usize,
    /// Branches whose PRs merged during this execution
    pub merged_branches: Vec<String>,
    /// Set when a restack step stopped on conflicts; the continuation is
    /// persisted and the plan halts
    pub conflict_branch: Option<String>,
    /// PR number of the consolidation PR, once created
    pub consolidation_pr: Option<u64>,
}

enum StepStatus {
    Done,
    Skipped(String),
    Conflict(String),
}

pub struct MergeExecutor<'a> {
    gateway: &'a GitGateway,
    store: &'a RefStore,
    forge: &'a dyn Forge,
    trunk: String,
    ci: CiWaitConfig,
}

impl<'a> MergeExecutor<'a> {
    pub fn new(
        gateway: &'a GitGateway,
        store: &'a RefStore,
        forge: &'a dyn Forge,
        trunk: String,
        ci: CiWaitConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            forge,
            trunk,
            ci,
        }
    }

    /// Execute a plan step by step.
    ///
    /// Steps run strictly sequentially. Preconditions are revalidated
    /// immediately before each step — PRs may have merged or closed since
    /// planning. On failure the current step is reported and the plan
    /// halts; remote work already done stays done.
    pub fn execute(&self, plan: &MergePlan, reporter: &dyn StepReporter) -> Result<MergeExecution> {
        let mut execution = MergeExecution::default();
        let total = plan.steps.len();

        for (index, step) in plan.steps.iter().enumerate() {
            reporter.step_start(index, total, step);

            match self.run_step(plan, step, &mut execution) {
                Ok(StepStatus::Done) => {
                    execution.completed_steps += 1;
                    reporter.step_done(step);
                }
                Ok(StepStatus::Skipped(reason)) => {
                    execution.completed_steps += 1;
                    reporter.step_skipped(step, &reason);
                }
                Ok(StepStatus::Conflict(branch)) => {
                    execution.conflict_branch = Some(branch);
                    reporter.info(&format!(
                        "Conflict — resolve it, then run '{} continue'.",
                        program_name()
                    ));
                    return Ok(execution);
                }
                Err(e) => {
                    reporter.step_failed(step, &e);
                    return Err(e);
                }
            }
        }

        Ok(execution)
    }

    /// Run the plan inside a throwaway detached worktree.
    ///
    /// The user's checkout stays untouched. On success the worktree is
    /// removed; on conflict it is preserved so the user can resolve there.
    pub fn execute_in_worktree(&self, plan: &MergePlan, reporter: &dyn StepReporter) -> Result<MergeExecution> {
        let mut guard = WorktreeGuard::create(self.gateway, "merge", &self.trunk)?;

        let wt_gateway = GitGateway::from_path(guard.path())?;
        let wt_store = RefStore::from_path(guard.path())?;
        let executor = MergeExecutor::new(&wt_gateway, &wt_store, self.forge, self.trunk.clone(), self.ci.clone());

        let execution = executor.execute(plan, reporter)?;
        if execution.conflict_branch.is_some() {
            guard.keep();
        }
        Ok(execution)
    }

    fn resolve_pr(&self, pr: u64, execution: &MergeExecution) -> Result<u64> {
        if pr != 0 {
            return Ok(pr);
        }
        execution
            .consolidation_pr
            .context("Consolidation PR number not available yet")
    }

    fn run_step(&self, plan: &MergePlan, step: &MergeStep, execution: &mut MergeExecution) -> Result<StepStatus> {
        match step {
            MergeStep::WaitCi { branch, pr } => self.wait_ci(branch, *pr, execution),
            MergeStep::MergePr { branch, pr } => self.merge_pr(branch, *pr, execution),
            MergeStep::PullTrunk => {
                self.gateway.fetch()?;
                self.gateway.fast_forward_trunk(&self.trunk)?;
                Ok(StepStatus::Done)
            }
            MergeStep::Restack { branch } => self.restack(plan, branch, execution),
            MergeStep::UpdatePrBase { branch, base } => self.update_pr_base(branch, base),
            MergeStep::DeleteBranch { branch } => self.delete_branch(branch),
            MergeStep::Consolidate { branches } => self.consolidate(branches, execution),
        }
    }

    fn wait_ci(&self, branch: &str, pr: u64, execution: &MergeExecution) -> Result<StepStatus> {
        let pr = self.resolve_pr(pr, execution)?;

        // The PR may have merged or closed since planning
        if let Some(record) = self.forge.pr_for_branch(branch)? {
            match record.state {
                PrState::Merged => return Ok(StepStatus::Skipped("PR already merged".to_string())),
                PrState::Closed => anyhow::bail!("PR #{} ({}) was closed while merging", pr, branch),
                PrState::Open => {}
            }
        }

        match wait_for_checks(self.forge, branch, &self.ci)? {
            CiWaitResult::Passed => Ok(StepStatus::Done),
            CiWaitResult::Failed(names) => {
                anyhow::bail!("CI failed on '{}': {}", branch, names.join(", "))
            }
            CiWaitResult::TimedOut => anyhow::bail!(
                "CI on '{}' did not finish within {} seconds.\n\
                 Raise the deadline with: {} config set merge.ci_timeout_secs <seconds>",
                branch,
                self.ci.timeout_secs,
                program_name()
            ),
        }
    }

    fn merge_pr(&self, branch: &str, pr: u64, execution: &mut MergeExecution) -> Result<StepStatus> {
        let pr = self.resolve_pr(pr, execution)?;

        if let Some(record) = self.forge.pr_for_branch(branch)? {
            match record.state {
                PrState::Merged => {
                    execution.merged_branches.push(branch.to_string());
                    return Ok(StepStatus::Skipped("PR already merged".to_string()));
                }
                PrState::Closed => anyhow::bail!("PR #{} ({}) was closed while merging", pr, branch),
                PrState::Open => {}
            }
        }

        self.forge
            .merge_pr(pr, MergeMethod::Merge)
            .with_context(|| format!("Failed to merge PR #{} ({})", pr, branch))?;

        if self.store.is_tracked(branch)? {
            self.store
                .update_metadata(branch, |m| {
                    if let Some(pr) = m.pr.as_mut() {
                        pr.state = PrState::Merged;
                    }
                })
                .ok();
        }

        execution.merged_branches.push(branch.to_string());
        Ok(StepStatus::Done)
    }

    fn restack(&self, plan: &MergePlan, branch: &str, execution: &MergeExecution) -> Result<StepStatus> {
        // Top-down: the top branch takes the whole stack's commits with it
        // onto trunk, so the single PR represents everything below
        if plan.strategy == MergeStrategy::TopDown && Some(branch) == plan.branches.last().map(String::as_str) {
            return self.collapse_onto_trunk(plan, branch);
        }

        let planner = RestackPlanner::new(self.gateway, self.store, self.trunk.clone());
        let original = self
            .gateway
            .get_current_branch_name()
            .unwrap_or_else(|_| self.trunk.clone());
        let mut state = planner.prepare(OperationKind::Merge, &original, &[branch.to_string()])?;
        state.removed_parents = execution.merged_branches.clone();

        let outcome = planner.run(&mut state)?;
        match outcome.conflict_branch {
            Some(conflicted) => Ok(StepStatus::Conflict(conflicted)),
            None => Ok(StepStatus::Done),
        }
    }

    fn collapse_onto_trunk(&self, plan: &MergePlan, top: &str) -> Result<StepStatus> {
        let bottom = plan.branches.first().context("Plan has no branches")?;
        let old_base = self.gateway.merge_base(bottom, &self.trunk)?;
        let trunk_tip = self.gateway.get_branch_sha(&self.trunk)?;

        match self.gateway.rebase_onto_from(top, &trunk_tip, &old_base)? {
            RebaseOutcome::Success => {
                self.store.reparent(top, &self.trunk)?;
                Ok(StepStatus::Done)
            }
            RebaseOutcome::Conflicts => {
                let original = self
                    .gateway
                    .get_current_branch_name()
                    .unwrap_or_else(|_| self.trunk.clone());
                let mut state =
                    ContinuationState::new(OperationKind::Merge, original, vec![top.to_string()]);
                state.current_branch = Some(top.to_string());
                state.old_bases.insert(self.trunk.clone(), old_base);
                state.save()?;
                Ok(StepStatus::Conflict(top.to_string()))
            }
        }
    }

    fn update_pr_base(&self, branch: &str, base: &str) -> Result<StepStatus> {
        let number = match self.pr_number_for(branch)? {
            Some(n) => n,
            None => return Ok(StepStatus::Skipped("no PR".to_string())),
        };

        self.forge.update_pr(
            number,
            &PrUpdate {
                base: Some(base.to_string()),
                ..Default::default()
            },
        )?;

        if self.store.is_tracked(branch)? {
            self.store
                .update_metadata(branch, |m| {
                    if let Some(pr) = m.pr.as_mut() {
                        pr.base = base.to_string();
                    }
                })
                .ok();
        }

        Ok(StepStatus::Done)
    }

    fn delete_branch(&self, branch: &str) -> Result<StepStatus> {
        // Never delete the checked-out branch out from under HEAD
        if self.gateway.get_current_branch_name().ok().as_deref() == Some(branch) {
            self.gateway.checkout_branch(&self.trunk)?;
        }

        if self.store.is_tracked(branch)? {
            self.store.remove_metadata(branch)?;
        }
        if self.gateway.branch_exists(branch)? {
            self.gateway.delete_branch(branch)?;
        } else {
            return Ok(StepStatus::Skipped("branch already gone".to_string()));
        }

        Ok(StepStatus::Done)
    }

    fn consolidate(&self, branches: &[String], execution: &mut MergeExecution) -> Result<StepStatus> {
        let name = consolidation_branch_name(branches);

        if self.gateway.branch_exists(&name)? {
            anyhow::bail!(
                "Consolidation branch '{}' already exists; delete it and retry.",
                name
            );
        }

        self.gateway.create_branch_at(&name, &self.trunk)?;
        self.gateway.checkout_branch(&name)?;

        // A --no-ff merge per branch keeps each branch's line visible so
        // the remote auto-closes the individual PRs on merge
        for branch in branches {
            self.gateway
                .merge_no_ff(branch, &format!("Merge {} into consolidation", branch))
                .with_context(|| format!("Consolidation merge of '{}' failed", branch))?;
        }

        self.gateway.push_branch(&name, false)?;

        let title = format!("Consolidate: {}", branches.join(", "));
        let body = {
            let mut b = String::from("Consolidated stack merge of:\n");
            for branch in branches {
                if let Some(number) = self.pr_number_for(branch)? {
                    b.push_str(&format!("- #{} ({})\n", number, branch));
                } else {
                    b.push_str(&format!("- {}\n", branch));
                }
            }
            b
        };
        let pr = self.forge.create_pr(&name, &self.trunk, &title, &body, false)?;
        execution.consolidation_pr = pr.number;

        // Point the subsumed PRs at the consolidation PR
        if let Some(number) = pr.number {
            for branch in branches {
                if let Some(sub) = self.pr_number_for(branch)? {
                    let existing = self
                        .forge
                        .pr_for_branch(branch)?
                        .map(|p| p.body)
                        .unwrap_or_default();
                    let body = format!("{}\n\nMerged via consolidation PR #{}.", existing.trim_end(), number);
                    self.forge
                        .update_pr(
                            sub,
                            &PrUpdate {
                                body: Some(body),
                                ..Default::default()
                            },
                        )
                        .ok();
                }
            }
        }

        Ok(StepStatus::Done)
    }

    fn pr_number_for(&self, branch: &str) -> Result<Option<u64>> {
        if let Some(meta) = self.store.read_metadata(branch).ok().flatten() {
            if let Some(pr) = meta.pr {
                if pr.number.is_some() {
                    return Ok(pr.number);
                }
            }
        }
        Ok(self.forge.pr_for_branch(branch)?.and_then(|pr| pr.number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::mock::{passing_checks, MockForge};
    use crate::forge::PrRecord;
    use crate::graph::BranchGraph;
    use crate::merge_exec::plan::{MergePlanner, PlanContext};
    use crate::test_context::{commit_file, init_test_repo, TestRepoContext};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn open_pr(number: u64, base: &str) -> PrRecord {
        PrRecord {
            number: Some(number),
            base: base.to_string(),
            url: format!("https://mock/pull/{}", number),
            title: format!("PR {}", number),
            body: String::new(),
            state: PrState::Open,
            draft: false,
        }
    }

    fn checkout(repo: &git2::Repository, branch: &str) -> Result<()> {
        repo.set_head(&format!("refs/heads/{}", branch))?;
        repo.checkout_head(Some(git2::build::CheckoutBuilder::new().force()))?;
        Ok(())
    }

    fn branch_at_head(repo: &git2::Repository, name: &str) -> Result<()> {
        let head = repo.head()?.peel_to_commit()?;
        repo.branch(name, &head, false)?;
        Ok(())
    }

    #[test]
    fn test_execute_merge_and_delete_steps() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        branch_at_head(&repo, "a")?;
        checkout(&repo, "a")?;
        commit_file(&repo, "a.txt", "a\n", "commit a")?;
        store.set_parent("a", "main")?;
        checkout(&repo, "main")?;

        let forge = MockForge::new();
        forge.add_pr("a", open_pr(1, "main"));
        forge.script_checks("a", vec![passing_checks()]);

        let gateway = GitGateway::new()?;
        let ci = CiWaitConfig {
            timeout_secs: 5,
            poll_interval_secs: 0,
            enabled: true,
        };
        let executor = MergeExecutor::new(&gateway, &store, &forge, "main".to_string(), ci);

        let plan = MergePlan {
            strategy: MergeStrategy::BottomUp,
            branches: vec!["a".to_string()],
            steps: vec![
                MergeStep::WaitCi {
                    branch: "a".to_string(),
                    pr: 1,
                },
                MergeStep::MergePr {
                    branch: "a".to_string(),
                    pr: 1,
                },
                MergeStep::DeleteBranch { branch: "a".to_string() },
            ],
            warnings: vec![],
            notices: vec![],
        };

        let execution = executor.execute(&plan, &QuietReporter)?;
        assert_eq!(execution.completed_steps, 3);
        assert_eq!(execution.merged_branches, vec!["a"]);
        assert!(execution.conflict_branch.is_none());
        assert_eq!(forge.merged_numbers(), vec![1]);
        assert!(!store.is_tracked("a")?);
        assert!(!gateway.branch_exists("a")?);
        Ok(())
    }

    #[test]
    fn test_restack_step_reparents_over_merged_branch() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;

        branch_at_head(&repo, "a")?;
        checkout(&repo, "a")?;
        commit_file(&repo, "a.txt", "a\n", "commit a")?;
        store.set_parent("a", "main")?;

        branch_at_head(&repo, "b")?;
        checkout(&repo, "b")?;
        commit_file(&repo, "b.txt", "b\n", "commit b")?;
        store.set_parent("b", "a")?;
        checkout(&repo, "main")?;

        let forge = MockForge::new();
        forge.add_pr("a", open_pr(1, "main"));
        forge.add_pr("b", open_pr(2, "a"));
        forge.script_checks("a", vec![passing_checks()]);

        let gateway = GitGateway::new()?;
        let ci = CiWaitConfig {
            timeout_secs: 5,
            poll_interval_secs: 0,
            enabled: true,
        };
        let executor = MergeExecutor::new(&gateway, &store, &forge, "main".to_string(), ci);

        let plan = MergePlan {
            strategy: MergeStrategy::BottomUp,
            branches: vec!["a".to_string()],
            steps: vec![
                MergeStep::MergePr {
                    branch: "a".to_string(),
                    pr: 1,
                },
                MergeStep::Restack { branch: "b".to_string() },
                MergeStep::UpdatePrBase {
                    branch: "b".to_string(),
                    base: "main".to_string(),
                },
            ],
            warnings: vec![],
            notices: vec![],
        };

        let execution = executor.execute(&plan, &QuietReporter)?;
        assert!(execution.conflict_branch.is_none());

        // b reparented onto trunk because a merged in this plan
        assert_eq!(store.get_parent("b")?.as_deref(), Some("main"));
        assert_eq!(forge.pr("b").unwrap().base, "main");
        Ok(())
    }

    #[test]
    fn test_ci_failure_halts_plan() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        branch_at_head(&repo, "a")?;
        store.set_parent("a", "main")?;

        let forge = MockForge::new();
        forge.add_pr("a", open_pr(1, "main"));
        forge.script_checks("a", vec![crate::forge::mock::failing_checks()]);

        let gateway = GitGateway::new()?;
        let ci = CiWaitConfig {
            timeout_secs: 5,
            poll_interval_secs: 0,
            enabled: true,
        };
        let executor = MergeExecutor::new(&gateway, &store, &forge, "main".to_string(), ci);

        let plan = MergePlan {
            strategy: MergeStrategy::BottomUp,
            branches: vec!["a".to_string()],
            steps: vec![
                MergeStep::WaitCi {
                    branch: "a".to_string(),
                    pr: 1,
                },
                MergeStep::MergePr {
                    branch: "a".to_string(),
                    pr: 1,
                },
            ],
            warnings: vec![],
            notices: vec![],
        };

        let result = executor.execute(&plan, &QuietReporter);
        assert!(result.is_err());
        // The merge step never ran
        assert!(forge.merged_numbers().is_empty());
        Ok(())
    }

    #[test]
    fn test_already_merged_pr_skipped_on_revalidation() -> Result<()> {
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        branch_at_head(&repo, "a")?;
        store.set_parent("a", "main")?;

        let forge = MockForge::new();
        let mut pr = open_pr(1, "main");
        pr.state = PrState::Merged;
        forge.add_pr("a", pr);

        let gateway = GitGateway::new()?;
        let executor = MergeExecutor::new(&gateway, &store, &forge, "main".to_string(), CiWaitConfig::default());

        let plan = MergePlan {
            strategy: MergeStrategy::BottomUp,
            branches: vec!["a".to_string()],
            steps: vec![MergeStep::MergePr {
                branch: "a".to_string(),
                pr: 1,
            }],
            warnings: vec![],
            notices: vec![],
        };

        let execution = executor.execute(&plan, &QuietReporter)?;
        assert_eq!(execution.completed_steps, 1);
        // No real merge call happened (the mock would have failed: not open)
        assert!(forge.merged_numbers().is_empty());
        Ok(())
    }

    #[test]
    fn test_planner_and_executor_end_to_end_locally() -> Result<()> {
        // Scenario: PRs #1 (a, base main), #2 (b, base a), #3 (c, base b).
        // Merging only a bottom-up must leave #2 based on main and #3 still
        // based on b.
        let dir = tempdir()?;
        let repo = init_test_repo(dir.path())?;
        let _ctx = TestRepoContext::new(dir.path());

        let store = RefStore::new()?;
        store.set_trunk("main")?;
        for (branch, parent, file) in [("a", "main", "a.txt"), ("b", "a", "b.txt"), ("c", "b", "c.txt")] {
            branch_at_head(&repo, branch)?;
            checkout(&repo, branch)?;
            commit_file(&repo, file, "x\n", &format!("commit {}", branch))?;
            store.set_parent(branch, parent)?;
        }
        checkout(&repo, "main")?;

        let forge = MockForge::new();
        forge.add_pr("a", open_pr(1, "main"));
        forge.add_pr("b", open_pr(2, "a"));
        forge.add_pr("c", open_pr(3, "b"));
        forge.script_checks("a", vec![passing_checks()]);

        let graph = BranchGraph::load(&store)?;
        let planner = MergePlanner::new(&graph);
        let mut prs = BTreeMap::new();
        prs.insert("a".to_string(), open_pr(1, "main"));
        let ctx = PlanContext {
            prs,
            checks: BTreeMap::new(),
            divergence: BTreeMap::new(),
        };
        let mut plan = planner.plan(MergeStrategy::BottomUp, &["a".to_string()], &ctx, false)?;
        // No remote in this test: drop the PullTrunk steps
        plan.steps.retain(|s| *s != MergeStep::PullTrunk);

        let gateway = GitGateway::new()?;
        let ci = CiWaitConfig {
            timeout_secs: 5,
            poll_interval_secs: 0,
            enabled: true,
        };
        let executor = MergeExecutor::new(&gateway, &store, &forge, "main".to_string(), ci);
        let execution = executor.execute(&plan, &QuietReporter)?;

        assert!(execution.conflict_branch.is_none());
        assert_eq!(forge.merged_numbers(), vec![1]);
        // The intermediate base keeps pointing at its actual parent
        assert_eq!(forge.pr("b").unwrap().base, "main");
        assert_eq!(forge.pr("c").unwrap().base, "b");
        // Local state: a gone, b reparented and restacked onto trunk
        assert!(!store.is_tracked("a")?);
        assert_eq!(store.get_parent("b")?.as_deref(), Some("main"));
        assert_eq!(store.get_parent("c")?.as_deref(), Some("b"));
        Ok(())
    }
}
