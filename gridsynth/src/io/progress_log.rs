//! Append-only CSV run log (`progress.csv`) and its summary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::core::attempt::AttemptRecord;
use crate::core::task::TaskId;

pub const PROGRESS_FILE: &str = "progress.csv";

/// Status written for tasks aborted by an unexpected fault.
pub const STATUS_EXCEPTION: &str = "exception";
/// Status of an accepted attempt.
pub const STATUS_SUCCESS: &str = "validated_success";

/// One row of the run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub timestamp: String,
    pub task_id: String,
    pub status: String,
    pub code_length: usize,
    pub validation_passed: bool,
    pub details: String,
}

impl ProgressRecord {
    /// Row for one finished attempt. `api_calls` is the run total at the time
    /// of the attempt.
    pub fn from_attempt(record: &AttemptRecord, api_calls: u64) -> Self {
        let accepted = record.result.is_accepted();
        let details = if accepted {
            format!("api_calls={api_calls},attempt={}", record.attempt)
        } else {
            single_line(&record.result.to_string())
        };
        Self {
            timestamp: format_timestamp(record.timestamp),
            task_id: record.task_id.to_string(),
            status: record.result.status().to_string(),
            code_length: record
                .candidate
                .as_ref()
                .map_or(0, |candidate| candidate.source.len()),
            validation_passed: accepted,
            details,
        }
    }

    /// Row for a task whose processing failed outside the attempt loop.
    pub fn task_fault(task_id: TaskId, message: &str) -> Self {
        Self {
            timestamp: format_timestamp(Utc::now()),
            task_id: task_id.to_string(),
            status: STATUS_EXCEPTION.to_string(),
            code_length: 0,
            validation_passed: false,
            details: single_line(message),
        }
    }
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Append-only sink for run log rows.
pub trait ProgressSink {
    fn append(&mut self, record: &ProgressRecord) -> Result<()>;
}

/// CSV run log; the header is written once, when the file is created.
pub struct CsvProgressLog {
    path: PathBuf,
    writer: csv::Writer<fs::File>,
}

impl CsvProgressLog {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
        let path = dir.join(PROGRESS_FILE);
        let needs_header = !matches!(fs::metadata(&path), Ok(meta) if meta.len() > 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        let writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressSink for CsvProgressLog {
    fn append(&mut self, record: &ProgressRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .with_context(|| format!("append to {}", self.path.display()))?;
        self.writer
            .flush()
            .with_context(|| format!("flush {}", self.path.display()))
    }
}

/// Totals aggregated from an existing run log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub rows: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Distinct task ids with at least one accepted row.
    pub solved_tasks: usize,
    /// Mean source length over accepted rows.
    pub mean_solution_bytes: Option<usize>,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "attempts logged: {}", self.rows)?;
        for (status, count) in &self.by_status {
            writeln!(f, "  {status}: {count}")?;
        }
        write!(f, "tasks solved: {}", self.solved_tasks)?;
        if let Some(mean) = self.mean_solution_bytes {
            write!(f, "\nmean solution length: {mean} bytes")?;
        }
        Ok(())
    }
}

/// Summarize the run log at `path`.
pub fn read_stats(path: &Path) -> Result<RunStats> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("open {}", path.display()))?;
    let mut stats = RunStats::default();
    let mut solved = BTreeSet::new();
    let mut solution_bytes = 0usize;
    let mut accepted_rows = 0usize;

    for row in reader.deserialize::<ProgressRecord>() {
        let row = row.with_context(|| format!("parse {}", path.display()))?;
        stats.rows += 1;
        *stats.by_status.entry(row.status.clone()).or_default() += 1;
        if row.validation_passed && row.status == STATUS_SUCCESS {
            accepted_rows += 1;
            solution_bytes += row.code_length;
            solved.insert(row.task_id);
        }
    }
    stats.solved_tasks = solved.len();
    stats.mean_solution_bytes = (accepted_rows > 0).then(|| solution_bytes / accepted_rows);
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attempt::{AttemptResult, Candidate};
    use crate::core::verdict::{ExampleFailure, FailureReason, Verdict};

    fn record(attempt: u32, result: AttemptResult, source: Option<&str>) -> AttemptRecord {
        let task_id = TaskId::new(5).expect("id");
        AttemptRecord {
            task_id,
            attempt,
            candidate: source.map(|source| Candidate {
                task_id,
                attempt,
                source: source.to_string(),
            }),
            result,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn success_rows_carry_call_count() {
        let accepted = AttemptResult::Judged(Verdict::Accepted { passed: 3 });
        let row = ProgressRecord::from_attempt(&record(2, accepted, Some("def p(g):return g")), 7);
        assert_eq!(row.status, STATUS_SUCCESS);
        assert_eq!(row.details, "api_calls=7,attempt=2");
        assert_eq!(row.code_length, 17);
        assert!(row.validation_passed);
        assert_eq!(row.task_id, "005");
    }

    #[test]
    fn failure_details_are_single_line() {
        let verdict = Verdict::Mismatch {
            passed: 0,
            total: 1,
            failures: vec![ExampleFailure {
                example_index: 0,
                reason: FailureReason::WrongOutput("expected a 1x1 grid, got 2x2".to_string()),
            }],
        };
        let row =
            ProgressRecord::from_attempt(&record(1, AttemptResult::Judged(verdict), Some("x")), 1);
        assert_eq!(row.status, "failed_validation");
        assert!(!row.details.contains('\n'));
        assert!(row.details.starts_with("Passed 0/1 train examples | - train example 1"));

        let row = ProgressRecord::from_attempt(
            &record(1, AttemptResult::ServiceFailed("timeout".to_string()), None),
            1,
        );
        assert_eq!(row.status, STATUS_EXCEPTION);
        assert_eq!(row.code_length, 0);
    }

    #[test]
    fn header_is_written_once_and_stats_aggregate() {
        let temp = tempfile::tempdir().expect("tempdir");
        {
            let mut log = CsvProgressLog::open(temp.path()).expect("open");
            let rejected = AttemptResult::Judged(Verdict::SyntaxInvalid {
                message: "bad".to_string(),
            });
            log.append(&ProgressRecord::from_attempt(&record(1, rejected, Some("def")), 1))
                .expect("append");
        }
        {
            let mut log = CsvProgressLog::open(temp.path()).expect("reopen");
            let accepted = AttemptResult::Judged(Verdict::Accepted { passed: 1 });
            log.append(&ProgressRecord::from_attempt(&record(2, accepted, Some("abcd")), 2))
                .expect("append");
        }

        let path = temp.path().join(PROGRESS_FILE);
        let contents = fs::read_to_string(&path).expect("read");
        assert_eq!(
            contents.lines().next(),
            Some("timestamp,task_id,status,code_length,validation_passed,details")
        );
        assert_eq!(contents.matches("timestamp,task_id").count(), 1);

        let stats = read_stats(&path).expect("stats");
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.by_status.get("syntax_error"), Some(&1));
        assert_eq!(stats.by_status.get("validated_success"), Some(&1));
        assert_eq!(stats.solved_tasks, 1);
        assert_eq!(stats.mean_solution_bytes, Some(4));
    }
}
