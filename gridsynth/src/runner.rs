//! Batch processing over a task source with a global call budget.

use std::fmt;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, instrument, warn};

use crate::core::attempt::AttemptResult;
use crate::core::task::TaskId;
use crate::core::verdict::Verdict;
use crate::io::generation::TextGenerator;
use crate::io::progress_log::{ProgressRecord, ProgressSink};
use crate::io::sandbox::Sandbox;
use crate::io::solution_store::SolutionStore;
use crate::io::task_source::TaskSource;
use crate::orchestrate::{AttemptOrchestrator, TaskOutcome};

/// Batch-level limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// No task is started once this many generation calls have been issued.
    pub max_api_calls: u64,
    /// Pause between two processed tasks.
    pub task_delay: Duration,
}

/// What happened to one task id.
#[derive(Debug)]
pub enum TaskReport {
    /// An accepted solution already existed.
    Skipped(TaskId),
    Finished(TaskOutcome),
    /// Processing hit an unexpected fault; the batch moved on.
    Faulted { task_id: TaskId, message: String },
}

/// Aggregate counters for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub accepted: usize,
    pub exhausted: usize,
    pub skipped: usize,
    /// Tasks aborted by an unexpected fault.
    pub faulted: usize,
    pub syntax_rejected: usize,
    pub semantic_failed: usize,
    /// Service failures plus faulted tasks.
    pub exceptions: usize,
    pub api_calls: u64,
    pub budget_exhausted: bool,
}

impl RunSummary {
    fn absorb(&mut self, outcome: &TaskOutcome) {
        if outcome.is_accepted() {
            self.accepted += 1;
        } else {
            self.exhausted += 1;
        }
        for record in &outcome.records {
            match &record.result {
                AttemptResult::ServiceFailed(_) => self.exceptions += 1,
                AttemptResult::Judged(Verdict::SyntaxInvalid { .. }) => self.syntax_rejected += 1,
                AttemptResult::Judged(Verdict::Accepted { .. }) => {}
                AttemptResult::Judged(
                    Verdict::MissingEntryPoint { .. }
                    | Verdict::RuntimeFailure { .. }
                    | Verdict::Mismatch { .. },
                ) => self.semantic_failed += 1,
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "accepted: {}", self.accepted)?;
        writeln!(f, "exhausted: {}", self.exhausted)?;
        writeln!(f, "skipped: {}", self.skipped)?;
        writeln!(f, "syntax errors: {}", self.syntax_rejected)?;
        writeln!(f, "validation failures: {}", self.semantic_failed)?;
        writeln!(f, "exceptions: {}", self.exceptions)?;
        write!(f, "api calls: {}", self.api_calls)?;
        if self.budget_exhausted {
            write!(f, " (budget reached)")?;
        }
        Ok(())
    }
}

/// Process every task from `source` in order.
///
/// The budget is checked before each task (never mid-task), tasks with an
/// existing solution are skipped without generation calls, and faults inside
/// one task are logged and counted without stopping the batch. Errors are
/// returned only when a fault cannot even be recorded.
#[instrument(skip_all, fields(max_api_calls = settings.max_api_calls))]
pub fn run_tasks<Src, G, S, St, L, F>(
    source: &Src,
    orchestrator: &mut AttemptOrchestrator<'_, G, S>,
    store: &mut St,
    log: &mut L,
    settings: &RunSettings,
    mut on_task: F,
) -> Result<RunSummary>
where
    Src: TaskSource,
    G: TextGenerator,
    S: Sandbox,
    St: SolutionStore,
    L: ProgressSink,
    F: FnMut(&TaskReport),
{
    let mut summary = RunSummary::default();
    let mut processed_any = false;

    for task_id in source.task_ids() {
        if orchestrator.calls() >= settings.max_api_calls {
            info!(calls = orchestrator.calls(), "call budget reached, stopping");
            summary.budget_exhausted = true;
            break;
        }
        if store.exists(task_id) {
            info!(task_id = %task_id, "solution exists, skipping");
            summary.skipped += 1;
            on_task(&TaskReport::Skipped(task_id));
            continue;
        }

        if processed_any && !settings.task_delay.is_zero() {
            thread::sleep(settings.task_delay);
        }
        processed_any = true;

        let result = source
            .load(task_id)
            .and_then(|task| orchestrator.run_task(&task, store, log));
        let report = match result {
            Ok(outcome) => {
                summary.absorb(&outcome);
                TaskReport::Finished(outcome)
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(task_id = %task_id, err = %message, "task aborted by unexpected fault");
                summary.faulted += 1;
                summary.exceptions += 1;
                if let Err(log_err) = log.append(&ProgressRecord::task_fault(task_id, &message)) {
                    warn!(task_id = %task_id, err = %format!("{log_err:#}"), "could not log fault");
                }
                TaskReport::Faulted { task_id, message }
            }
        };
        on_task(&report);
    }

    summary.api_calls = orchestrator.calls();
    Ok(summary)
}
