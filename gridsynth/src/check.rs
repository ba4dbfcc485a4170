//! Stand-alone verification of a saved solution file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::instrument;

use crate::core::task::TaskId;
use crate::core::verdict::Verdict;
use crate::io::sandbox::Sandbox;
use crate::io::task_source::TaskSource;
use crate::validator::AttemptValidator;

/// Validate the source in `solution` against task `id`.
///
/// The file is used verbatim; no fence extraction is applied.
#[instrument(skip_all, fields(task_id = %id, solution = %solution.display()))]
pub fn check_solution<Src: TaskSource, S: Sandbox>(
    source: &Src,
    id: TaskId,
    solution: &Path,
    validator: &AttemptValidator<S>,
) -> Result<Verdict> {
    let task = source.load(id)?;
    let code =
        fs::read_to_string(solution).with_context(|| format!("read {}", solution.display()))?;
    validator.validate(&task, &code)
}
