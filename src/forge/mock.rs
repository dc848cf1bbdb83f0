//! Scriptable in-memory forge for tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::types::{ChecksStatus, MergeMethod, PrRecord, PrState, PrUpdate};
use super::Forge;

/// In-memory forge. PRs are keyed by head branch; CI statuses can be
/// scripted as a per-branch sequence that is consumed poll by poll.
pub struct MockForge {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    prs: HashMap<String, PrRecord>,
    checks: HashMap<String, Vec<ChecksStatus>>,
    next_number: u64,
    merged: Vec<u64>,
}

impl MockForge {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_number: 1,
                ..Default::default()
            }),
        }
    }

    /// Seed a PR for a branch
    pub fn add_pr(&self, branch: &str, pr: PrRecord) {
        self.state.lock().unwrap().prs.insert(branch.to_string(), pr);
    }

    /// Script the sequence of CI statuses returned for a branch.
    /// The last entry repeats once the sequence is exhausted.
    pub fn script_checks(&self, branch: &str, sequence: Vec<ChecksStatus>) {
        self.state.lock().unwrap().checks.insert(branch.to_string(), sequence);
    }

    /// Numbers of PRs merged through this forge, in order
    pub fn merged_numbers(&self) -> Vec<u64> {
        self.state.lock().unwrap().merged.clone()
    }

    /// Current record for a branch (inspect mutations made by code under test)
    pub fn pr(&self, branch: &str) -> Option<PrRecord> {
        self.state.lock().unwrap().prs.get(branch).cloned()
    }

    fn find_branch_by_number(state: &MockState, number: u64) -> Option<String> {
        state
            .prs
            .iter()
            .find(|(_, pr)| pr.number == Some(number))
            .map(|(branch, _)| branch.clone())
    }
}

impl Default for MockForge {
    fn default() -> Self {
        Self::new()
    }
}

impl Forge for MockForge {
    fn check_auth(&self) -> Result<()> {
        Ok(())
    }

    fn owner_repo(&self) -> Result<(String, String)> {
        Ok(("octo".to_string(), "repo".to_string()))
    }

    fn pr_for_branch(&self, branch: &str) -> Result<Option<PrRecord>> {
        Ok(self.state.lock().unwrap().prs.get(branch).cloned())
    }

    fn create_pr(&self, branch: &str, base: &str, title: &str, body: &str, draft: bool) -> Result<PrRecord> {
        let mut state = self.state.lock().unwrap();
        let number = state.next_number;
        state.next_number += 1;

        let pr = PrRecord {
            number: Some(number),
            base: base.to_string(),
            url: format!("https://mock/pull/{}", number),
            title: title.to_string(),
            body: body.to_string(),
            state: PrState::Open,
            draft,
        };
        state.prs.insert(branch.to_string(), pr.clone());
        Ok(pr)
    }

    fn update_pr(&self, number: u64, update: &PrUpdate) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let branch = match Self::find_branch_by_number(&state, number) {
            Some(b) => b,
            None => bail!("PR #{} not found", number),
        };
        let pr = state.prs.get_mut(&branch).expect("branch just found");

        if let Some(title) = &update.title {
            pr.title = title.clone();
        }
        if let Some(body) = &update.body {
            pr.body = body.clone();
        }
        if let Some(base) = &update.base {
            pr.base = base.clone();
        }
        if let Some(draft) = update.draft {
            pr.draft = draft;
        }
        Ok(())
    }

    fn merge_pr(&self, number: u64, _method: MergeMethod) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let branch = match Self::find_branch_by_number(&state, number) {
            Some(b) => b,
            None => bail!("PR #{} not found", number),
        };
        let pr = state.prs.get_mut(&branch).expect("branch just found");
        if pr.state != PrState::Open {
            bail!("PR #{} is not open", number);
        }
        pr.state = PrState::Merged;
        state.merged.push(number);
        Ok(())
    }

    fn checks_status(&self, branch: &str) -> Result<ChecksStatus> {
        let mut state = self.state.lock().unwrap();
        match state.checks.get_mut(branch) {
            Some(seq) if seq.len() > 1 => Ok(seq.remove(0)),
            Some(seq) if seq.len() == 1 => Ok(seq[0].clone()),
            _ => Ok(ChecksStatus {
                passing: true,
                pending: false,
                checks: Vec::new(),
            }),
        }
    }
}

/// A passing aggregate status with a single named check
pub fn passing_checks() -> ChecksStatus {
    use super::types::{CheckDetail, CheckState};
    ChecksStatus {
        passing: true,
        pending: false,
        checks: vec![CheckDetail {
            name: "ci".to_string(),
            status: CheckState::Passing,
            started_at: None,
            finished_at: None,
        }],
    }
}

/// A pending aggregate status with a single named check
pub fn pending_checks() -> ChecksStatus {
    use super::types::{CheckDetail, CheckState};
    ChecksStatus {
        passing: false,
        pending: true,
        checks: vec![CheckDetail {
            name: "ci".to_string(),
            status: CheckState::Pending,
            started_at: None,
            finished_at: None,
        }],
    }
}

/// A failing aggregate status with a single named check
pub fn failing_checks() -> ChecksStatus {
    use super::types::{CheckDetail, CheckState};
    ChecksStatus {
        passing: false,
        pending: false,
        checks: vec![CheckDetail {
            name: "ci".to_string(),
            status: CheckState::Failing,
            started_at: None,
            finished_at: None,
        }],
    }
}
