//! Hunk→commit assignment for absorb.

use anyhow::Result;

use crate::git_gateway::{GitGateway, Hunk};

/// A staged hunk bound to the commit that should absorb it.
#[derive(Debug, Clone)]
pub struct HunkTarget {
    pub hunk: Hunk,
    /// Target commit SHA
    pub commit: String,
    /// Branch the target commit belongs to
    pub branch: String,
    /// Position of the commit in the newest-first candidate list
    pub index: usize,
}

/// The computed assignment for one absorb invocation.
#[derive(Debug, Clone, Default)]
pub struct AbsorbPlan {
    pub targets: Vec<HunkTarget>,
    /// Hunks every candidate commuted with; nothing depends on them
    pub unabsorbable: Vec<Hunk>,
}

/// Targets of one branch, grouped per commit.
#[derive(Debug, Clone)]
pub struct BranchGroup {
    pub branch: String,
    /// (commit, hunks destined for it); commits in candidate order
    pub commits: Vec<(String, Vec<HunkTarget>)>,
}

impl AbsorbPlan {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty() && self.unabsorbable.is_empty()
    }

    /// Group targets by branch, then by commit within each branch.
    ///
    /// Every target commit belongs to exactly one tracked branch, so this
    /// partitioning is total. Branch order and commit order both follow
    /// the candidate list (newest first).
    pub fn groups(&self) -> Vec<BranchGroup> {
        let mut groups: Vec<BranchGroup> = Vec::new();

        for target in &self.targets {
            let group = match groups.iter_mut().find(|g| g.branch == target.branch) {
                Some(g) => g,
                None => {
                    groups.push(BranchGroup {
                        branch: target.branch.clone(),
                        commits: Vec::new(),
                    });
                    groups.last_mut().expect("just pushed")
                }
            };

            match group.commits.iter_mut().find(|(c, _)| *c == target.commit) {
                Some((_, hunks)) => hunks.push(target.clone()),
                None => group.commits.push((target.commit.clone(), vec![target.clone()])),
            }
        }

        groups
    }
}

/// Assign each hunk to the newest candidate commit that does not commute
/// with it.
///
/// Commutation: a commit commutes with a hunk iff the commit's changes to
/// the hunk's file do not touch any line the hunk removes. The test is
/// line-range overlap between the hunk's old-side range and the commit's
/// new-side ranges for the same file. The first (newest) non-commuting
/// commit wins; if every candidate commutes the hunk is unabsorbable.
pub fn assign_targets(
    gateway: &GitGateway,
    hunks: Vec<Hunk>,
    candidates: &[(String, String)],
) -> Result<AbsorbPlan> {
    let mut plan = AbsorbPlan::default();

    for hunk in hunks {
        let mut assigned = false;

        for (index, (commit, branch)) in candidates.iter().enumerate() {
            if !commutes(gateway, commit, &hunk)? {
                plan.targets.push(HunkTarget {
                    hunk: hunk.clone(),
                    commit: commit.clone(),
                    branch: branch.clone(),
                    index,
                });
                assigned = true;
                break;
            }
        }

        if !assigned {
            plan.unabsorbable.push(hunk);
        }
    }

    Ok(plan)
}

fn commutes(gateway: &GitGateway, commit: &str, hunk: &Hunk) -> Result<bool> {
    let commit_hunks = gateway.commit_hunks(commit, &hunk.path)?;
    if commit_hunks.is_empty() {
        // Commit never touched the file
        return Ok(true);
    }

    Ok(!commit_hunks
        .iter()
        .any(|ch| Hunk::ranges_overlap(hunk.old_range(), ch.new_range())))
}
