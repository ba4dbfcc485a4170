//! LLM-driven synthesis of grid-transformation programs.
//!
//! A candidate program is generated for each task, checked against the task's
//! training examples, and refined with the failure as feedback until it is
//! accepted or the attempt budget runs out. The crate is split:
//!
//! - **[`core`]**: Pure, deterministic logic (grids, tasks, verdict scoring,
//!   code extraction, prompt composition, the attempt state machine).
//! - **[`io`]**: Side effects (config, child processes, the Python sandbox,
//!   the generation service, task files, solutions and the run log). Each
//!   collaborator sits behind a trait so tests can substitute fakes.
//!
//! Orchestration modules ([`validator`], [`orchestrate`], [`runner`],
//! [`check`]) coordinate core logic with I/O to implement CLI commands.

pub mod check;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validator;
