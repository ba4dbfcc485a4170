//! Persistence of accepted (and optionally rejected) candidate source.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::task::TaskId;

/// Sink for candidate source keyed by task id.
pub trait SolutionStore {
    /// Whether an accepted solution already exists for `id`.
    fn exists(&self, id: TaskId) -> bool;

    fn save(&mut self, id: TaskId, source: &str) -> Result<()>;

    /// Keep a rejected candidate for later inspection. May be a no-op.
    fn save_failed(&mut self, id: TaskId, attempt: u32, source: &str) -> Result<()>;
}

/// Writes `task{NNN}.py` and `failed/task{NNN}_attempt{k}.py` under one directory.
#[derive(Debug, Clone)]
pub struct DirectorySolutionStore {
    dir: PathBuf,
    keep_failed: bool,
}

impl DirectorySolutionStore {
    pub fn new(dir: impl Into<PathBuf>, keep_failed: bool) -> Self {
        Self {
            dir: dir.into(),
            keep_failed,
        }
    }

    pub fn solution_path(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{}.py", id.stem()))
    }

    pub fn failed_path(&self, id: TaskId, attempt: u32) -> PathBuf {
        self.dir
            .join("failed")
            .join(format!("{}_attempt{attempt}.py", id.stem()))
    }
}

fn write_source(path: &Path, source: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut contents = source.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

impl SolutionStore for DirectorySolutionStore {
    fn exists(&self, id: TaskId) -> bool {
        self.solution_path(id).is_file()
    }

    fn save(&mut self, id: TaskId, source: &str) -> Result<()> {
        let path = self.solution_path(id);
        write_source(&path, source)?;
        debug!(path = %path.display(), "saved solution");
        Ok(())
    }

    fn save_failed(&mut self, id: TaskId, attempt: u32, source: &str) -> Result<()> {
        if !self.keep_failed {
            return Ok(());
        }
        write_source(&self.failed_path(id, attempt), source)
    }
}
