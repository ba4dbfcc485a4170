//! Side-effecting collaborators of the synthesis loop.

pub mod config;
pub mod generation;
pub mod process;
pub mod progress_log;
pub mod sandbox;
pub mod solution_store;
pub mod task_source;
