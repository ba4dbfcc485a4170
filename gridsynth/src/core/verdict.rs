//! Verdicts for validated candidates and the feedback rendered from them.
//!
//! Scoring is pure: the validator collects one [`ExampleResult`] per training
//! example and [`score`] folds them into a single [`Verdict`].

use std::fmt;

/// Why a single training example did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The candidate returned a value that does not equal the expected grid.
    WrongOutput(String),
    /// The candidate raised or timed out on this example.
    Fault(String),
}

/// A failing training example (0-based index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExampleFailure {
    pub example_index: usize,
    pub reason: FailureReason,
}

/// Outcome of running the candidate on one training example.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExampleResult {
    Passed,
    Failed(FailureReason),
}

/// Structured outcome of validating a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    SyntaxInvalid {
        message: String,
    },
    MissingEntryPoint {
        message: String,
    },
    /// No example could be scored; carries the first fault.
    RuntimeFailure {
        example_index: usize,
        message: String,
    },
    Mismatch {
        passed: usize,
        total: usize,
        failures: Vec<ExampleFailure>,
    },
    Accepted {
        passed: usize,
    },
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    /// Run-log status for this verdict.
    pub fn status(&self) -> &'static str {
        match self {
            Verdict::Accepted { .. } => "validated_success",
            Verdict::SyntaxInvalid { .. } => "syntax_error",
            Verdict::MissingEntryPoint { .. }
            | Verdict::RuntimeFailure { .. }
            | Verdict::Mismatch { .. } => "failed_validation",
        }
    }
}

/// Human-readable rendering used as refinement feedback and in the run log.
impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::SyntaxInvalid { message } => write!(f, "Syntax error: {message}"),
            Verdict::MissingEntryPoint { message } => write!(f, "Entry point error: {message}"),
            Verdict::RuntimeFailure {
                example_index,
                message,
            } => write!(
                f,
                "Runtime error on train example {}: {message}",
                example_index + 1
            ),
            Verdict::Mismatch {
                passed,
                total,
                failures,
            } => {
                write!(f, "Passed {passed}/{total} train examples")?;
                for failure in failures {
                    let n = failure.example_index + 1;
                    match &failure.reason {
                        FailureReason::WrongOutput(detail) => {
                            write!(f, "\n- train example {n}: wrong output ({detail})")?;
                        }
                        FailureReason::Fault(message) => {
                            write!(f, "\n- train example {n}: raised {message}")?;
                        }
                    }
                }
                Ok(())
            }
            Verdict::Accepted { passed } => {
                write!(f, "Passed {passed}/{passed} train examples")
            }
        }
    }
}

/// Fold per-example results into a verdict.
///
/// Every example must pass for `Accepted`; an empty result set is never
/// accepted. When every example faulted, the first fault is surfaced as a
/// `RuntimeFailure`; otherwise any shortfall is a `Mismatch` that keeps the
/// per-example detail.
pub fn score(results: &[ExampleResult]) -> Verdict {
    let total = results.len();
    let mut passed = 0;
    let mut scored = 0;
    let mut failures = Vec::new();

    for (example_index, result) in results.iter().enumerate() {
        match result {
            ExampleResult::Passed => {
                passed += 1;
                scored += 1;
            }
            ExampleResult::Failed(reason) => {
                if matches!(reason, FailureReason::WrongOutput(_)) {
                    scored += 1;
                }
                failures.push(ExampleFailure {
                    example_index,
                    reason: reason.clone(),
                });
            }
        }
    }

    if total > 0 && passed == total {
        return Verdict::Accepted { passed };
    }
    if total > 0
        && scored == 0
        && let Some(ExampleFailure {
            example_index,
            reason: FailureReason::Fault(message),
        }) = failures.first()
    {
        return Verdict::RuntimeFailure {
            example_index: *example_index,
            message: message.clone(),
        };
    }
    Verdict::Mismatch {
        passed,
        total,
        failures,
    }
}
