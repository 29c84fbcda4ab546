//! I/O and boundary adapters for the coordination engine.

pub mod backend;
pub mod config;
pub mod decision;
pub mod init;
pub mod recovery_store;
pub mod telemetry;
