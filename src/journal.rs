//! Append-only operation journal.
//!
//! Every state-mutating operation writes start/completion entries to
//! `.git/strata/operations.jsonl`. The journal is what `st undo` consults
//! to pair operations with the snapshots taken before them, and what
//! `st history`-style inspection reads. Bounded with rotation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// Maximum number of journal entries kept before rotation
const MAX_JOURNAL_ENTRIES: usize = 1000;

/// Operations recorded in the journal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    BranchCreated {
        branch: String,
        parent: Option<String>,
    },
    BranchDeleted {
        branch: String,
    },
    BranchMoved {
        branch: String,
        old_parent: Option<String>,
        new_parent: Option<String>,
    },
    RestackStarted {
        branches: Vec<String>,
    },
    RestackCompleted {
        branches: Vec<String>,
        success: bool,
    },
    SyncStarted {
        branches: Vec<String>,
    },
    SyncCompleted {
        branches: Vec<String>,
        success: bool,
    },
    MergeStarted {
        branches: Vec<String>,
        strategy: String,
    },
    MergeCompleted {
        branches: Vec<String>,
        success: bool,
    },
    AbsorbApplied {
        branches: Vec<String>,
        hunks: usize,
    },
    SnapshotTaken {
        id: String,
        command: String,
    },
    SnapshotRestored {
        id: String,
    },
}

/// A journal entry with timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
}

impl JournalEntry {
    pub fn new(operation: Operation) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
        }
    }
}

/// The journal stored in .git/strata/operations.jsonl
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new() -> Result<Self> {
        let repo_root = crate::state::find_git_root()?;
        let state_dir = repo_root.join(".git").join("strata");
        if !state_dir.exists() {
            fs::create_dir_all(&state_dir)?;
        }
        Ok(Self {
            path: state_dir.join("operations.jsonl"),
        })
    }

    #[cfg(test)]
    pub fn from_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one operation
    pub fn record(&self, operation: Operation) -> Result<()> {
        let entry = JournalEntry::new(operation);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to open operation journal")?;

        let json = serde_json::to_string(&entry).context("Failed to serialize journal entry")?;
        writeln!(file, "{}", json).context("Failed to write to operation journal")?;

        self.maybe_rotate()?;
        Ok(())
    }

    /// Rotate once the journal exceeds the bound by a margin, so rotation
    /// doesn't run on every write
    fn maybe_rotate(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let file = File::open(&self.path)?;
        let line_count = BufReader::new(file).lines().count();
        if line_count <= MAX_JOURNAL_ENTRIES + 100 {
            return Ok(());
        }

        let entries = self.read_all()?;
        let to_keep = &entries[entries.len().saturating_sub(MAX_JOURNAL_ENTRIES)..];

        let temp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&temp_path)?;
            for entry in to_keep {
                writeln!(file, "{}", serde_json::to_string(entry)?)?;
            }
        }
        fs::rename(&temp_path, &self.path).context("Failed to rotate journal")?;
        Ok(())
    }

    /// Read all entries, oldest first
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).context("Failed to open operation journal")?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalEntry = serde_json::from_str(&line).context("Failed to parse journal entry")?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Read the last N entries, oldest first
    pub fn read_last(&self, n: usize) -> Result<Vec<JournalEntry>> {
        let all = self.read_all()?;
        let start = all.len().saturating_sub(n);
        Ok(all[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_and_read() -> Result<()> {
        let dir = tempdir()?;
        let journal = Journal::from_path(dir.path().join("ops.jsonl"));

        journal.record(Operation::BranchCreated {
            branch: "feature".to_string(),
            parent: Some("main".to_string()),
        })?;
        journal.record(Operation::RestackStarted {
            branches: vec!["feature".to_string()],
        })?;

        let entries = journal.read_all()?;
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].operation, Operation::BranchCreated { .. }));
        Ok(())
    }

    #[test]
    fn test_read_last() -> Result<()> {
        let dir = tempdir()?;
        let journal = Journal::from_path(dir.path().join("ops.jsonl"));

        for i in 0..5 {
            journal.record(Operation::BranchDeleted {
                branch: format!("b{}", i),
            })?;
        }

        let last = journal.read_last(2)?;
        assert_eq!(last.len(), 2);
        assert!(matches!(
            &last[1].operation,
            Operation::BranchDeleted { branch } if branch == "b4"
        ));
        Ok(())
    }

    #[test]
    fn test_empty_journal_reads_empty() -> Result<()> {
        let dir = tempdir()?;
        let journal = Journal::from_path(dir.path().join("ops.jsonl"));
        assert!(journal.read_all()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_snapshot_entries_roundtrip() -> Result<()> {
        let dir = tempdir()?;
        let journal = Journal::from_path(dir.path().join("ops.jsonl"));

        journal.record(Operation::SnapshotTaken {
            id: "snap-1".to_string(),
            command: "move".to_string(),
        })?;
        journal.record(Operation::SnapshotRestored {
            id: "snap-1".to_string(),
        })?;

        let entries = journal.read_all()?;
        assert!(matches!(
            &entries[0].operation,
            Operation::SnapshotTaken { id, command } if id == "snap-1" && command == "move"
        ));
        Ok(())
    }
}
