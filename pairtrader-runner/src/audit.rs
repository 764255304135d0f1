//! Decision audit log: one JSON object per cycle, append-only.
//!
//! Records holds as well as trades, so "why did the bot not act at 14:00"
//! can be answered after the fact. Malformed lines are skipped on read.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use pairtrader_core::domain::{Pair, Trade};
use pairtrader_core::engine::{Action, Decision};

/// Which collaborator failed during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collaborator {
    Ledger,
    Snapshot,
    Forecast,
    Execution,
}

/// A collaborator error captured by the cycle instead of returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorFailure {
    pub collaborator: Collaborator,
    pub error: String,
    pub transient: bool,
}

/// What happened after the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// Decision was Hold, or there was nothing to decide on.
    NotAttempted,
    /// Evaluate-only run; the order was not submitted.
    DryRun,
    Filled { trade: Trade },
    Rejected { reason: String },
    Failed { reason: String },
}

impl ExecutionOutcome {
    /// The fill, when the order went through.
    pub fn filled_trade(&self) -> Option<&Trade> {
        match self {
            ExecutionOutcome::Filled { trade } => Some(trade),
            _ => None,
        }
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub timestamp: DateTime<Utc>,
    pub pair: Pair,
    pub config_fingerprint: String,
    /// Absent when no snapshot could be fetched.
    pub decision: Option<Decision>,
    #[serde(default)]
    pub failures: Vec<CollaboratorFailure>,
    pub execution: ExecutionOutcome,
}

impl DecisionRecord {
    /// Action decided, `Hold` when nothing was decided.
    pub fn action(&self) -> Action {
        self.decision.as_ref().map_or(Action::Hold, |d| d.action)
    }
}

/// Append-only JSONL file of [`DecisionRecord`]s.
pub struct DecisionLog {
    path: PathBuf,
}

impl DecisionLog {
    /// Log at `path`, created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single line.
    pub fn append(&self, record: &DecisionRecord) -> io::Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push('\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    /// Every readable record in file order. A missing file reads as empty.
    pub fn read_all(&self) -> io::Result<Vec<DecisionRecord>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(path = %self.path.display(), line = i + 1, error = %e, "skipping malformed decision record"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairtrader_core::domain::{MarketSnapshot, Side};
    use pairtrader_core::engine::{decide, DecisionConfig};

    fn record(ts: DateTime<Utc>) -> DecisionRecord {
        let pair = Pair::new("ETH", "BTC").unwrap();
        let config = DecisionConfig::with_defaults(pair.clone());
        let snapshot = MarketSnapshot {
            pair: pair.clone(),
            last_price: 0.045,
            free_base: 0.0,
            free_quote: 1.0,
        };
        let anchor = Trade::filled(ts, Side::Sell, 20.0, 0.05);
        DecisionRecord {
            timestamp: ts,
            pair,
            config_fingerprint: "abc".into(),
            decision: Some(decide(&snapshot, Some(&anchor), None, ts, &config)),
            failures: vec![CollaboratorFailure {
                collaborator: Collaborator::Forecast,
                error: "timed out".into(),
                transient: true,
            }],
            execution: ExecutionOutcome::DryRun,
        }
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::new(dir.path().join("logs/decisions.jsonl"));
        let a = record(Utc::now());
        log.append(&a).unwrap();
        log.append(&a).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].timestamp, a.timestamp);
        assert_eq!(all[0].failures, a.failures);
        assert_eq!(all[0].execution, ExecutionOutcome::DryRun);
        assert_eq!(
            all[0].decision.as_ref().map(|d| d.branch),
            a.decision.as_ref().map(|d| d.branch)
        );
        assert!(matches!(all[0].action(), Action::Buy { .. }));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.jsonl");
        let log = DecisionLog::new(&path);
        log.append(&record(Utc::now())).unwrap();
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "{{truncated").unwrap();
        log.append(&record(Utc::now())).unwrap();

        assert_eq!(log.read_all().unwrap().len(), 2);
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DecisionLog::new(dir.path().join("none.jsonl")).read_all().unwrap().is_empty());
    }
}
