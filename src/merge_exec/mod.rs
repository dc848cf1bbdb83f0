//! Merge planning and execution.
//!
//! Turning "merge this stack" into remote merges is a two-phase affair:
//! the planner validates the selection and emits an ordered list of steps
//! from a finite step vocabulary; the executor walks the steps strictly
//! sequentially, revalidating the world before each one (PRs move under
//! us), waiting on CI, and reusing the restack planner for the local
//! repair steps. Work already committed remotely is never rolled back; a
//! failed step halts the plan and reports.

mod exec;
mod plan;

pub use exec::{ConsoleReporter, MergeExecution, MergeExecutor, QuietReporter, StepReporter};
pub use plan::{MergePlan, MergePlanner, MergeStep, MergeStrategy, PlanContext};
