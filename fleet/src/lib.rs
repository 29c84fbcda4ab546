//! Fleet coordination and recovery-learning engine.
//!
//! Agents share a grid with a hazard zone that makes them STUCK. Each agent's
//! task runs in its own execution loop; loops compete for target cells
//! through a clearance gate and learn which recovery maneuver works where.
//!
//! - **[`core`]**: Pure, deterministic logic (grid physics, advice,
//!   reallocation choice, strategy parsing). No I/O.
//! - **[`io`]**: Config, persistence, telemetry and the motion/decision
//!   boundaries.
//!
//! Orchestration modules ([`arbiter`], [`coordinator`], [`execution`],
//! [`fleet`]) combine the two into a running fleet.

pub mod arbiter;
pub mod coordinator;
pub mod core;
pub mod error;
pub mod execution;
pub mod exit_codes;
pub mod fleet;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
