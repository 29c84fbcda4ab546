//! Stable exit codes for fleet CLI commands.

/// Command succeeded; for `fleet run`, every task (or its retry) completed.
pub const OK: i32 = 0;
/// Invalid input, config or store, or any other command error.
pub const INVALID: i32 = 1;
/// `fleet run` finished but at least one task failed.
pub const TASKS_FAILED: i32 = 2;
