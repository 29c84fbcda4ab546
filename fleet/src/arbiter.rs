//! Clearance arbitration for target cells.
//!
//! One critical section covers the claim check, the grid conflict check and
//! the pre-reservation, so two concurrent requests can never both observe a
//! free cell. The section never spans an `.await`.

use std::sync::Arc;

use tracing::debug;

use crate::coordinator::TaskCoordinator;
use crate::core::types::{Pos, Task, TaskStatus};
use crate::error::{DenialReason, FleetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    Granted,
    Denied(DenialReason),
}

impl Clearance {
    pub fn is_granted(self) -> bool {
        matches!(self, Clearance::Granted)
    }
}

/// Placeholder id for a reservation written at grant time.
pub fn pending_task_id(agent: &str) -> String {
    format!("pending_{agent}")
}

#[derive(Debug, Clone)]
pub struct ConflictArbiter {
    coordinator: Arc<TaskCoordinator>,
}

impl ConflictArbiter {
    pub fn new(coordinator: Arc<TaskCoordinator>) -> Self {
        Self { coordinator }
    }

    /// An agent whose open task claims another cell is busy; only a pending
    /// reservation of its own may be moved.
    pub fn request_clearance(&self, agent: &str, target: Pos) -> Result<Clearance, FleetError> {
        let mut ledger = self.coordinator.lock_ledger();

        let reserve = match ledger.current(agent) {
            None => true,
            Some(task) if task.status.is_terminal() || task.status == TaskStatus::Pending => true,
            Some(task) if task.target == target => false,
            Some(task) => {
                debug!(agent, %target, held = %task.target, "agent holds another open task");
                return Err(FleetError::AgentBusy {
                    agent: agent.to_string(),
                    status: format!("{} task for {}", task.status, task.target),
                });
            }
        };

        if let Some(claim) = ledger.claim_by_other(agent, target) {
            debug!(agent, %target, holder = %claim.agent_id, "target already claimed");
            return Ok(Clearance::Denied(DenialReason::TargetAlreadyClaimed));
        }

        {
            let world = self.coordinator.world().lock();
            world.agent(agent)?;
            world.ensure_in_bounds(target)?;
            if world.check_conflict(agent, target) {
                debug!(agent, %target, "path conflict");
                return Ok(Clearance::Denied(DenialReason::PathConflict));
            }
        }

        if reserve {
            ledger.install(Task {
                task_id: pending_task_id(agent),
                agent_id: agent.to_string(),
                target,
                status: TaskStatus::Pending,
            });
        }
        debug!(agent, %target, reserved = reserve, "clearance granted");
        Ok(Clearance::Granted)
    }

    /// Withdraw a reservation that was never activated. Returns whether one was removed.
    pub fn release(&self, agent: &str) -> bool {
        let removed = self.coordinator.lock_ledger().remove_pending(agent);
        if let Some(task) = &removed {
            debug!(agent, target = %task.target, "pending reservation released");
        }
        removed.is_some()
    }
}
