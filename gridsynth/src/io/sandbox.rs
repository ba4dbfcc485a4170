//! Isolated execution of candidate programs.
//!
//! The [`Sandbox`] trait is the seam between validation and the interpreter.
//! [`PythonSandbox`] creates a fresh `python3 -I` child for every syntax check,
//! load probe and call, so no candidate state survives between invocations.
//! Tests substitute scripted sandboxes that never spawn a process.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::grid::{Grid, RawRows};
use crate::io::config::SandboxConfig;
use crate::io::process::{ChildOutput, run_with_timeout};

const HARNESS: &str = include_str!("harness.py");

/// Result of parsing candidate source without running it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxCheck {
    Valid,
    Invalid(String),
}

/// Why a candidate's entry point could not be obtained.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{0}")]
    Missing(String),
    #[error("{0}")]
    NotCallable(String),
    #[error("{0}")]
    BadSignature(String),
    /// Top-level code raised, exited or timed out while loading.
    #[error("module failed to load: {0}")]
    ModuleFault(String),
    /// The sandbox itself failed; not a property of the candidate.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// What a single entry-point invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Returned(RawRows),
    /// The call completed but its value is not a list of integer rows.
    NotAGrid(String),
    Raised(String),
    TimedOut(Duration),
}

/// A loaded, invocable candidate entry point.
pub trait EntryPoint {
    /// Invoke the entry point on a private copy of `input`.
    fn call(&self, input: &Grid) -> Result<CallOutcome>;
}

/// Factory for isolated execution contexts.
pub trait Sandbox {
    type Entry: EntryPoint;

    fn check_syntax(&self, source: &str) -> Result<SyntaxCheck>;

    fn load_entry_point(&self, source: &str) -> Result<Self::Entry, LoadError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Mode {
    Syntax,
    Probe,
    Call,
}

#[derive(Debug, Serialize)]
struct HarnessRequest<'a> {
    mode: Mode,
    source: &'a str,
    entry: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<&'a Grid>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum HarnessReply {
    Ok {
        #[serde(default)]
        rows: Option<RawRows>,
    },
    SyntaxError {
        message: String,
    },
    ModuleFault {
        message: String,
    },
    Missing {
        message: String,
    },
    NotCallable {
        message: String,
    },
    BadSignature {
        message: String,
    },
    Raised {
        message: String,
    },
    NotAGrid {
        message: String,
    },
}

/// How a harness child ended.
#[derive(Debug)]
enum Exchange {
    Reply(HarnessReply),
    TimedOut,
    /// The child ended without a readable reply (candidate killed the
    /// interpreter or wrote over the reply channel).
    NoReply(String),
}

/// Sandbox backed by a fresh Python interpreter per invocation.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    python: String,
    entry: String,
    timeout: Duration,
    output_limit: usize,
}

impl PythonSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            python: config.python.clone(),
            entry: config.entry_point.clone(),
            timeout: config.timeout(),
            output_limit: config.output_limit_bytes,
        }
    }

    /// Whether the configured interpreter can be started at all.
    pub fn interpreter_available(python: &str) -> bool {
        Command::new(python)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn exchange(&self, mode: Mode, source: &str, input: Option<&Grid>) -> Result<Exchange> {
        let request = HarnessRequest {
            mode,
            source,
            entry: &self.entry,
            input,
        };
        let payload = serde_json::to_vec(&request).context("serialize harness request")?;

        let scratch = tempfile::tempdir().context("create sandbox directory")?;
        let cmd = self.command(scratch.path());
        let output = run_with_timeout(cmd, &payload, self.timeout, self.output_limit)
            .with_context(|| format!("run {}", self.python))?;

        if output.timed_out {
            return Ok(Exchange::TimedOut);
        }
        match serde_json::from_slice::<HarnessReply>(&output.stdout) {
            Ok(reply) => Ok(Exchange::Reply(reply)),
            Err(err) => {
                debug!(err = %err, "harness reply unreadable");
                Ok(Exchange::NoReply(no_reply_message(&output)))
            }
        }
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-I").arg("-c").arg(HARNESS).current_dir(workdir).env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd
    }
}

fn no_reply_message(output: &ChildOutput) -> String {
    let status = match output.status.code() {
        Some(code) => format!("exit status {code}"),
        None => "a signal".to_string(),
    };
    let stderr = output.stderr_lossy();
    let last_line = stderr.lines().last().unwrap_or("");
    let mut message = format!("interpreter ended with {status} before replying");
    if !last_line.is_empty() {
        message.push_str(": ");
        message.push_str(last_line);
    }
    if output.truncated > 0 {
        message.push_str(&format!(" ({} bytes of output discarded)", output.truncated));
    }
    message
}

impl Sandbox for PythonSandbox {
    type Entry = PythonEntryPoint;

    #[instrument(skip_all, fields(source_bytes = source.len()))]
    fn check_syntax(&self, source: &str) -> Result<SyntaxCheck> {
        match self.exchange(Mode::Syntax, source, None)? {
            Exchange::Reply(HarnessReply::Ok { .. }) => Ok(SyntaxCheck::Valid),
            Exchange::Reply(HarnessReply::SyntaxError { message }) => {
                Ok(SyntaxCheck::Invalid(message))
            }
            Exchange::Reply(other) => bail!("unexpected syntax reply {other:?}"),
            // The parser itself gave up on this source.
            Exchange::TimedOut => Ok(SyntaxCheck::Invalid(format!(
                "parsing timed out after {:?}",
                self.timeout
            ))),
            Exchange::NoReply(message) => Ok(SyntaxCheck::Invalid(message)),
        }
    }

    #[instrument(skip_all, fields(source_bytes = source.len()))]
    fn load_entry_point(&self, source: &str) -> Result<PythonEntryPoint, LoadError> {
        match self.exchange(Mode::Probe, source, None)? {
            Exchange::Reply(HarnessReply::Ok { .. }) => Ok(PythonEntryPoint {
                sandbox: self.clone(),
                source: source.to_string(),
            }),
            Exchange::Reply(HarnessReply::Missing { message }) => Err(LoadError::Missing(message)),
            Exchange::Reply(HarnessReply::NotCallable { message }) => {
                Err(LoadError::NotCallable(message))
            }
            Exchange::Reply(HarnessReply::BadSignature { message }) => {
                Err(LoadError::BadSignature(message))
            }
            Exchange::Reply(HarnessReply::ModuleFault { message }) => {
                Err(LoadError::ModuleFault(message))
            }
            Exchange::Reply(other) => Err(LoadError::Internal(anyhow::anyhow!(
                "unexpected probe reply {other:?}"
            ))),
            Exchange::TimedOut => Err(LoadError::ModuleFault(format!(
                "loading timed out after {:?}",
                self.timeout
            ))),
            Exchange::NoReply(message) => Err(LoadError::ModuleFault(message)),
        }
    }
}

/// Entry point of a candidate that loaded successfully.
///
/// Holds the source rather than a live interpreter; each call re-executes the
/// module in a new child.
#[derive(Debug, Clone)]
pub struct PythonEntryPoint {
    sandbox: PythonSandbox,
    source: String,
}

impl EntryPoint for PythonEntryPoint {
    fn call(&self, input: &Grid) -> Result<CallOutcome> {
        let outcome = match self.sandbox.exchange(Mode::Call, &self.source, Some(input))? {
            Exchange::Reply(HarnessReply::Ok { rows: Some(rows) }) => CallOutcome::Returned(rows),
            Exchange::Reply(HarnessReply::Ok { rows: None }) => {
                bail!("harness reported success without rows")
            }
            Exchange::Reply(HarnessReply::NotAGrid { message }) => CallOutcome::NotAGrid(message),
            Exchange::Reply(
                HarnessReply::Raised { message }
                | HarnessReply::ModuleFault { message }
                | HarnessReply::Missing { message }
                | HarnessReply::NotCallable { message }
                | HarnessReply::BadSignature { message }
                | HarnessReply::SyntaxError { message },
            ) => CallOutcome::Raised(message),
            Exchange::TimedOut => CallOutcome::TimedOut(self.sandbox.timeout),
            Exchange::NoReply(message) => CallOutcome::Raised(message),
        };
        Ok(outcome)
    }
}
