//! Ordered task input read from a directory of `taskNNN.json` records.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tracing::{debug, warn};

use crate::core::task::{Task, TaskId};

/// Ordered provider of tasks.
pub trait TaskSource {
    /// Task ids in processing order.
    fn task_ids(&self) -> Vec<TaskId>;

    fn load(&self, id: TaskId) -> Result<Task>;
}

/// Reads `task{NNN}.json` files for an inclusive id range.
#[derive(Debug, Clone)]
pub struct DirectoryTaskSource {
    dir: PathBuf,
    start: u32,
    end: u32,
}

impl DirectoryTaskSource {
    pub fn new(dir: impl Into<PathBuf>, start: u32, end: u32) -> Result<Self> {
        if start == 0 {
            bail!("task range must start at 1 or later");
        }
        if start > end {
            bail!("task range {start}..={end} is empty");
        }
        let dir = dir.into();
        if !dir.is_dir() {
            bail!("task directory {} does not exist", dir.display());
        }
        Ok(Self { dir, start, end })
    }

    pub fn task_path(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", id.stem()))
    }
}

impl TaskSource for DirectoryTaskSource {
    fn task_ids(&self) -> Vec<TaskId> {
        let mut ids = Vec::new();
        for raw in self.start..=self.end {
            let Ok(id) = TaskId::new(raw) else { continue };
            if self.task_path(id).is_file() {
                ids.push(id);
            } else {
                warn!(task_id = %id, "task file not found, skipping");
            }
        }
        debug!(found = ids.len(), "enumerated tasks");
        ids
    }

    fn load(&self, id: TaskId) -> Result<Task> {
        let path = self.task_path(id);
        let json =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Task::from_json(id, &json).with_context(|| format!("load {}", path.display()))
    }
}
