//! Append-only record of orchestrator-visible actions, independent of
//! review-server or VCS history. Used for `doctor`/audit introspection and
//! by the janitor to reason about what it has already done.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

/// Entries beyond this count are trimmed, keeping only the most recent.
const MAX_JOURNAL_ENTRIES: usize = 1000;

/// One orchestrator-visible action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    ReplicaSynced {
        project: String,
        branch: String,
        revision: String,
    },
    TargetAdvanced {
        project: String,
        target_branch: String,
    },
    RecombinationUploaded {
        project: String,
        topic: String,
        branch: String,
    },
    RecombinationSubmitted {
        project: String,
        number: String,
    },
    BranchDeleted {
        project: String,
        branch: String,
    },
    ProjectSkipped {
        project: String,
        reason: String,
    },
}

/// A journal entry with its timestamp and optional free-form note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl JournalEntry {
    pub fn new(operation: Operation) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            message: None,
        }
    }

    pub fn with_message(operation: Operation, message: String) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            message: Some(message),
        }
    }
}

/// The journal stored at `<base-dir>/.gitnetics/operations.jsonl`.
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn open(base_dir: &std::path::Path) -> Result<Self> {
        let state_dir = base_dir.join(".gitnetics");
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

    pub fn record(&self, operation: Operation) -> Result<()> {
        self.append(JournalEntry::new(operation))
    }

    pub fn record_with_message(&self, operation: Operation, message: String) -> Result<()> {
        self.append(JournalEntry::with_message(operation, message))
    }

    fn append(&self, entry: JournalEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("failed to open operation journal")?;

        let json = serde_json::to_string(&entry).context("failed to serialize journal entry")?;
        writeln!(file, "{json}").context("failed to write to operation journal")?;

        self.maybe_trim()
    }

    fn maybe_trim(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        let file = File::open(&self.path)?;
        let line_count = BufReader::new(file).lines().count();
        if line_count <= MAX_JOURNAL_ENTRIES + 100 {
            return Ok(());
        }

        let entries = self.read_all()?;
        if entries.len() <= MAX_JOURNAL_ENTRIES {
            return Ok(());
        }
        let to_keep = &entries[entries.len() - MAX_JOURNAL_ENTRIES..];

        let temp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&temp_path)?;
            for entry in to_keep {
                writeln!(file, "{}", serde_json::to_string(entry)?)?;
            }
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path).context("failed to open operation journal")?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("failed to read journal line")?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line).context("failed to parse journal entry")?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_and_read_back() -> Result<()> {
        let dir = tempdir()?;
        let journal = Journal::from_path(dir.path().join("operations.jsonl"));

        journal.record(Operation::ReplicaSynced {
            project: "p".into(),
            branch: "master".into(),
            revision: "abc123".into(),
        })?;
        journal.record_with_message(
            Operation::ProjectSkipped {
                project: "q".into(),
                reason: "config error".into(),
            },
            "skipped during poll-original".into(),
        )?;

        let entries = journal.read_all()?;
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].operation, Operation::ReplicaSynced { .. }));
        assert_eq!(
            entries[1].message.as_deref(),
            Some("skipped during poll-original")
        );
        Ok(())
    }

    #[test]
    fn rotation_keeps_most_recent() -> Result<()> {
        let dir = tempdir()?;
        let journal = Journal::from_path(dir.path().join("operations.jsonl"));

        for i in 0..(MAX_JOURNAL_ENTRIES + 250) {
            journal.record(Operation::BranchDeleted {
                project: "p".into(),
                branch: format!("recomb-{i}"),
            })?;
        }

        let entries = journal.read_all()?;
        assert!(entries.len() <= MAX_JOURNAL_ENTRIES + 100);
        if let Operation::BranchDeleted { branch, .. } = &entries[0].operation {
            let n: usize = branch.strip_prefix("recomb-").unwrap().parse().unwrap();
            assert!(n > 0, "oldest entry should have been trimmed");
        }
        Ok(())
    }

    #[test]
    fn empty_journal_reads_as_empty() -> Result<()> {
        let dir = tempdir()?;
        let journal = Journal::from_path(dir.path().join("operations.jsonl"));
        assert!(journal.read_all()?.is_empty());
        Ok(())
    }
}
