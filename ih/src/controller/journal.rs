//! Event journal - appends every target event to a JSONL file
//!
//! Each line is one [`JournalEntry`]. Entries from several runs may share a
//! file; the run id tells them apart.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::TargetEvent;

/// One journal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    pub event: TargetEvent,
}

pub struct EventJournal {
    path: PathBuf,
    run_id: String,
    writer: BufWriter<File>,
}

impl EventJournal {
    /// Open `path` for appending, creating parent directories as needed
    pub fn open(path: impl AsRef<Path>, run_id: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventJournal::open: called");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context(format!("Failed to create journal directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open journal {}", path.display()))?;
        Ok(Self {
            path,
            run_id: run_id.into(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, event: &TargetEvent) -> Result<()> {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            event: event.clone(),
        };
        let json = serde_json::to_string(&entry)?;
        writeln!(self.writer, "{}", json)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Read back the entries of a journal file, skipping malformed lines
pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<JournalEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_journal: called");
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).context(format!("Failed to read journal {}", path.display()))?;
    let mut entries = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<JournalEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_journal: failed to parse line"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ThreadId;
    use tempfile::tempdir;

    #[test]
    fn test_record_appends_lines() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("events.jsonl");
        let mut journal = EventJournal::open(&path, "run-1").unwrap();

        journal
            .record(&TargetEvent::VmStarted {
                main_thread: ThreadId(1),
            })
            .unwrap();
        journal.record(&TargetEvent::Disconnected).unwrap();

        let entries = read_journal(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].run_id, "run-1");
        assert_eq!(entries[1].event, TargetEvent::Disconnected);
    }

    #[test]
    fn test_reopen_keeps_earlier_runs() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");

        EventJournal::open(&path, "a")
            .unwrap()
            .record(&TargetEvent::Disconnected)
            .unwrap();
        EventJournal::open(&path, "b")
            .unwrap()
            .record(&TargetEvent::Disconnected)
            .unwrap();

        let runs: Vec<_> = read_journal(&path).unwrap().into_iter().map(|e| e.run_id).collect();
        assert_eq!(runs, vec!["a", "b"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("events.jsonl");
        fs::write(&path, "not json\n\n").unwrap();

        assert!(read_journal(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_journal_reads_empty() {
        let temp = tempdir().unwrap();
        assert!(read_journal(temp.path().join("absent.jsonl")).unwrap().is_empty());
    }
}
