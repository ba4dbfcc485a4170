//! Deterministic, pure logic for the synthesis loop.
//!
//! Core modules are free of I/O side effects. They operate on in-memory data
//! and return deterministic outputs suitable for tests.

pub mod attempt;
pub mod extract;
pub mod grid;
pub mod prompt;
pub mod task;
pub mod verdict;
