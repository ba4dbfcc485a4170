//! Candidate validation: static policy, syntax, entry point, then every
//! training example in order.

use anyhow::Result;
use tracing::{debug, instrument};

use crate::core::task::Task;
use crate::core::verdict::{ExampleResult, FailureReason, Verdict, score};
use crate::io::sandbox::{CallOutcome, EntryPoint, LoadError, Sandbox, SyntaxCheck};

/// Validates candidate source against a task's training examples.
pub struct AttemptValidator<S> {
    sandbox: S,
    max_source_bytes: usize,
}

impl<S: Sandbox> AttemptValidator<S> {
    pub fn new(sandbox: S, max_source_bytes: usize) -> Self {
        Self {
            sandbox,
            max_source_bytes,
        }
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    /// Static length policy and syntax check. Returns the rejection, if any.
    ///
    /// Never executes the candidate.
    pub fn check_syntax(&self, source: &str) -> Result<Option<Verdict>> {
        if source.len() > self.max_source_bytes {
            return Ok(Some(Verdict::SyntaxInvalid {
                message: format!(
                    "source is {} bytes, limit is {}",
                    source.len(),
                    self.max_source_bytes
                ),
            }));
        }
        match self.sandbox.check_syntax(source)? {
            SyntaxCheck::Valid => Ok(None),
            SyntaxCheck::Invalid(message) => Ok(Some(Verdict::SyntaxInvalid { message })),
        }
    }

    /// Entry-point check followed by scoring every training example.
    ///
    /// A fault on one example never stops the remaining examples from being
    /// scored.
    pub fn check_semantics(&self, task: &Task, source: &str) -> Result<Verdict> {
        let entry = match self.sandbox.load_entry_point(source) {
            Ok(entry) => entry,
            Err(LoadError::Internal(err)) => return Err(err),
            Err(err) => {
                return Ok(Verdict::MissingEntryPoint {
                    message: err.to_string(),
                });
            }
        };

        let mut results = Vec::with_capacity(task.train().len());
        for (index, example) in task.train().iter().enumerate() {
            let result = match entry.call(&example.input)? {
                CallOutcome::Returned(rows) => match example.output.describe_difference(&rows) {
                    None => ExampleResult::Passed,
                    Some(detail) => ExampleResult::Failed(FailureReason::WrongOutput(detail)),
                },
                CallOutcome::NotAGrid(message) => {
                    ExampleResult::Failed(FailureReason::WrongOutput(message))
                }
                CallOutcome::Raised(message) => ExampleResult::Failed(FailureReason::Fault(message)),
                CallOutcome::TimedOut(limit) => ExampleResult::Failed(FailureReason::Fault(
                    format!("timed out after {:.1}s", limit.as_secs_f64()),
                )),
            };
            debug!(example = index + 1, ?result, "scored training example");
            results.push(result);
        }
        Ok(score(&results))
    }

    /// Full validation of `source` against `task`.
    #[instrument(skip_all, fields(task_id = %task.id(), source_bytes = source.len()))]
    pub fn validate(&self, task: &Task, source: &str) -> Result<Verdict> {
        if let Some(rejection) = self.check_syntax(source)? {
            return Ok(rejection);
        }
        self.check_semantics(task, source)
    }
}
