//! Task records: training and evaluation example pairs for one puzzle.

use std::fmt;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::grid::Grid;

/// Positive task identifier, rendered zero-padded (`task007`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u32);

impl TaskId {
    pub fn new(id: u32) -> Result<Self> {
        if id == 0 {
            bail!("task id must be positive");
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Zero-padded stem shared by task files and solution artifacts.
    pub fn stem(self) -> String {
        format!("task{:03}", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

/// Training pair with a ground-truth output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: Grid,
    pub output: Grid,
}

/// Evaluation pair; the output may be withheld.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalExample {
    pub input: Grid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Grid>,
}

/// On-disk task record (`{"train": [...], "test": [...]}`).
///
/// Unknown keys (for example generator-specific example sets) are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskRecord {
    #[serde(default)]
    pub train: Vec<Example>,
    #[serde(default)]
    pub test: Vec<EvalExample>,
}

/// One puzzle instance. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    id: TaskId,
    train: Vec<Example>,
    eval: Vec<EvalExample>,
}

impl Task {
    pub fn new(id: TaskId, train: Vec<Example>, eval: Vec<EvalExample>) -> Result<Self> {
        if train.is_empty() {
            bail!("task {id} has no training examples");
        }
        Ok(Self { id, train, eval })
    }

    /// Parse a task from its JSON record.
    pub fn from_json(id: TaskId, json: &str) -> Result<Self> {
        let record: TaskRecord =
            serde_json::from_str(json).with_context(|| format!("parse task {id}"))?;
        Self::new(id, record.train, record.test)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn train(&self) -> &[Example] {
        &self.train
    }

    pub fn eval(&self) -> &[EvalExample] {
        &self.eval
    }
}
