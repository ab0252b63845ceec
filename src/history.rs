use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Install,
    Update,
    Rollback,
    Remove,
    Clean,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Install => "install",
            Operation::Update => "update",
            Operation::Rollback => "rollback",
            Operation::Remove => "remove",
            Operation::Clean => "clean",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// One completed operation attempt. Appended exactly once, after the outcome
/// is known; never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub repo: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_version: Option<String>,
    pub outcome: Outcome,
    #[serde(default)]
    pub detail: String,
}

impl HistoryRecord {
    pub fn new(repo: &str, operation: Operation, outcome: Outcome, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            repo: repo.to_string(),
            operation,
            from_version: None,
            to_version: None,
            outcome,
            detail: detail.into(),
        }
    }

    pub fn with_versions(mut self, from: Option<String>, to: Option<String>) -> Self {
        self.from_version = from;
        self.to_version = to;
        self
    }

    pub fn format_line(&self) -> String {
        let status = match self.outcome {
            Outcome::Success => "SUCCESS",
            Outcome::Failure => "FAILED",
        };
        let versions = match (&self.from_version, &self.to_version) {
            (Some(from), Some(to)) => format!(" {} -> {}", from, to),
            (None, Some(to)) => format!(" {}", to),
            _ => String::new(),
        };
        format!(
            "{} | {:7} | {:8} | {}{} | {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            status,
            self.operation.as_str(),
            self.repo,
            versions,
            self.detail
        )
    }
}

/// Append-only operation log, one JSON record per line.
///
/// Appends share the advisory-lock discipline of the cache store so
/// concurrent invocations interleave whole lines, never fragments. Reads
/// skip lines that fail to parse.
pub struct HistoryLedger {
    path: PathBuf,
}

impl HistoryLedger {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Record one completed attempt. Logging failures are warned about, not
    /// propagated: a lost audit line must not fail the operation it records.
    pub fn append(&self, record: &HistoryRecord) {
        if let Err(err) = self.try_append(record) {
            tracing::warn!("Failed to append history record: {}", err);
        }
    }

    fn try_append(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let result = file.write_all(line.as_bytes());
        let _ = FileExt::unlock(&file);
        result?;
        Ok(())
    }

    /// Records most recent first, optionally filtered by repository and
    /// truncated to `limit`.
    pub fn list(&self, repo: Option<&str>, limit: Option<usize>) -> Vec<HistoryRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };

        let mut records: Vec<HistoryRecord> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::warn!("Skipping unreadable history line: {}", err);
                    None
                }
            })
            .filter(|record: &HistoryRecord| repo.map_or(true, |r| record.repo == r))
            .collect();

        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        records
    }

    /// Truncate the whole ledger. The only mutation the ledger permits.
    pub fn clear(&self) -> std::io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
