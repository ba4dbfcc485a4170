//! Process exit codes for gridsynth commands.

/// Command succeeded (for `check`: the solution was accepted).
pub const OK: i32 = 0;
/// Setup failed, or `check` rejected the solution.
pub const FAILURE: i32 = 1;
