//! Typed failures returned by the coordination components.
//!
//! Orchestration and CLI code wrap these in `anyhow::Error`; callers that need
//! to branch on a specific condition use `downcast_ref::<FleetError>()`.

use crate::core::types::Pos;

/// Why a clearance request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Another agent holds a non-terminal task for the same cell.
    TargetAlreadyClaimed,
    /// Another agent occupies the cell or is navigating toward it.
    PathConflict,
    /// The decision layer vetoed an otherwise grantable request.
    Vetoed,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DenialReason::TargetAlreadyClaimed => "target already claimed",
            DenialReason::PathConflict => "path conflict",
            DenialReason::Vetoed => "vetoed by decision layer",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FleetError {
    #[error("clearance denied: {reason}")]
    ClearanceDenied { reason: DenialReason },

    #[error("agent {agent} has no active task")]
    NoActiveTask { agent: String },

    #[error("no idle agents available for {target}")]
    NoIdleAgents { target: Pos },

    #[error("invalid recovery strategy {name:?}")]
    InvalidStrategy { name: String },

    #[error("agent {agent} exhausted {attempts} recovery attempts")]
    CriticalRecoveryFailure { agent: String, attempts: u32 },

    #[error("agent {agent} timed out after {ticks} ticks")]
    Timeout { agent: String, ticks: u32 },

    #[error("task of agent {agent} is {status}, not failed")]
    TaskNotFailed { agent: String, status: String },

    #[error("unknown agent {agent}")]
    UnknownAgent { agent: String },

    #[error("agent {agent} is busy ({status})")]
    AgentBusy { agent: String, status: String },

    #[error("agent {agent} is not stuck")]
    NotStuck { agent: String },

    #[error("{pos} lies outside the {size}x{size} grid")]
    OutOfBounds { pos: Pos, size: i32 },

    #[error("hardware link failure for {agent}: {message}")]
    Hardware { agent: String, message: String },
}

impl FleetError {
    pub fn unknown_agent(agent: &str) -> Self {
        FleetError::UnknownAgent {
            agent: agent.to_string(),
        }
    }
}
