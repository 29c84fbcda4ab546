//! Task ledger and reallocation.
//!
//! The ledger mutex doubles as the clearance critical section (see
//! [`crate::arbiter`]). Lock order is always ledger, then world.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::core::grid::GridWorld;
use crate::core::reallocation::nearest_agent;
use crate::core::types::{AgentStatus, Pos, Task, TaskStatus};
use crate::error::{DenialReason, FleetError};
use crate::io::backend::SharedWorld;

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    /// Latest task per agent.
    current: BTreeMap<String, Task>,
    /// Superseded terminal tasks, oldest first.
    archive: Vec<Task>,
}

impl Ledger {
    /// A non-terminal task of another agent claiming `target`.
    pub(crate) fn claim_by_other(&self, agent: &str, target: Pos) -> Option<&Task> {
        self.current
            .values()
            .find(|task| task.agent_id != agent && task.target == target && !task.status.is_terminal())
    }

    pub(crate) fn current(&self, agent: &str) -> Option<&Task> {
        self.current.get(agent)
    }

    /// Replace the agent's entry, archiving a terminal predecessor.
    pub(crate) fn install(&mut self, task: Task) {
        if let Some(previous) = self.current.insert(task.agent_id.clone(), task)
            && previous.status.is_terminal()
        {
            self.archive.push(previous);
        }
    }

    /// Close an open task whose agent already sits idle on its target.
    fn reconcile_stale(&mut self, agent: &str) {
        if let Some(task) = self.current.get_mut(agent)
            && !task.status.is_terminal()
        {
            debug!(agent, task_id = %task.task_id, "reconciling stale task as complete");
            task.status = TaskStatus::Complete;
        }
    }

    pub(crate) fn remove_pending(&mut self, agent: &str) -> Option<Task> {
        match self.current.get(agent) {
            Some(task) if task.status == TaskStatus::Pending => self.current.remove(agent),
            _ => None,
        }
    }

    fn idle_agents(&self, world: &GridWorld) -> Vec<(String, Pos)> {
        world
            .agents()
            .filter(|agent| agent.status == AgentStatus::Idle)
            .filter(|agent| match self.current.get(&agent.id) {
                None => true,
                Some(task) => task.status.is_terminal() || agent.pose == task.target,
            })
            .map(|agent| (agent.id.clone(), agent.pose))
            .collect()
    }
}

#[derive(Debug)]
pub struct TaskCoordinator {
    world: SharedWorld,
    ledger: Mutex<Ledger>,
}

impl TaskCoordinator {
    pub fn new(world: SharedWorld) -> Self {
        Self {
            world,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub(crate) fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock()
    }

    pub(crate) fn world(&self) -> &SharedWorld {
        &self.world
    }

    /// Assign `target` to an IDLE agent under the default task id.
    pub fn assign(&self, agent: &str, target: Pos) -> Result<Task, FleetError> {
        self.assign_with_id(agent, target, Task::default_id(agent, target))
    }

    pub fn assign_with_id(&self, agent: &str, target: Pos, task_id: String) -> Result<Task, FleetError> {
        let mut ledger = self.ledger.lock();
        let world = self.world.lock();
        let state = world.agent(agent)?;
        world.ensure_in_bounds(target)?;
        if state.status != AgentStatus::Idle {
            return Err(FleetError::AgentBusy {
                agent: agent.to_string(),
                status: state.status.to_string(),
            });
        }
        if let Some(task) = ledger.current.get(agent)
            && !task.status.is_terminal()
            && state.pose != task.target
        {
            return Err(FleetError::AgentBusy {
                agent: agent.to_string(),
                status: task.status.to_string(),
            });
        }
        ledger.reconcile_stale(agent);
        if ledger.claim_by_other(agent, target).is_some() {
            return Err(FleetError::ClearanceDenied {
                reason: DenialReason::TargetAlreadyClaimed,
            });
        }
        let task = Task {
            task_id,
            agent_id: agent.to_string(),
            target,
            status: TaskStatus::Assigned,
        };
        ledger.install(task.clone());
        info!(agent, task_id = %task.task_id, %target, "task assigned");
        Ok(task)
    }

    /// Promote the agent's reservation for `target` to an active task.
    pub fn activate(&self, agent: &str, task_id: &str, target: Pos) -> Result<Task, FleetError> {
        let mut ledger = self.ledger.lock();
        match ledger.current.get_mut(agent) {
            Some(task) if !task.status.is_terminal() && task.target == target => {
                task.task_id = task_id.to_string();
                task.status = TaskStatus::Active;
                Ok(task.clone())
            }
            _ => Err(FleetError::NoActiveTask {
                agent: agent.to_string(),
            }),
        }
    }

    /// Close the agent's current task. Completing a terminal task returns it unchanged.
    pub fn mark_complete(&self, agent: &str, success: bool) -> Result<Task, FleetError> {
        let mut ledger = self.ledger.lock();
        let task = ledger
            .current
            .get_mut(agent)
            .ok_or_else(|| FleetError::NoActiveTask {
                agent: agent.to_string(),
            })?;
        if task.status.is_terminal() {
            debug!(agent, task_id = %task.task_id, status = %task.status, "task already terminal");
            return Ok(task.clone());
        }
        task.status = if success {
            TaskStatus::Complete
        } else {
            TaskStatus::Failed
        };
        info!(agent, task_id = %task.task_id, status = %task.status, "task closed");
        Ok(task.clone())
    }

    /// Fail the agent's task for `target` if it is still open.
    pub fn abandon(&self, agent: &str, target: Pos) -> Option<Task> {
        let mut ledger = self.ledger.lock();
        let task = ledger.current.get_mut(agent)?;
        if task.status.is_terminal() || task.target != target {
            return None;
        }
        task.status = TaskStatus::Failed;
        info!(agent, task_id = %task.task_id, "task abandoned");
        Some(task.clone())
    }

    /// Agents free to take work, in id order.
    pub fn idle_agents(&self) -> Vec<String> {
        let ledger = self.ledger.lock();
        let world = self.world.lock();
        ledger
            .idle_agents(&world)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Hand the failed agent's target to the nearest idle agent as `<task_id>_retry`.
    ///
    /// The agent's current task must already be failed. Agents in `busy` still
    /// own unfinished work and are never chosen.
    pub fn reallocate(&self, failed_agent: &str, busy: &BTreeSet<String>) -> Result<Task, FleetError> {
        let mut ledger = self.ledger.lock();
        let failed = ledger
            .current
            .get(failed_agent)
            .cloned()
            .ok_or_else(|| FleetError::NoActiveTask {
                agent: failed_agent.to_string(),
            })?;
        if failed.status != TaskStatus::Failed {
            return Err(FleetError::TaskNotFailed {
                agent: failed_agent.to_string(),
                status: failed.status.to_string(),
            });
        }

        if ledger.claim_by_other(failed_agent, failed.target).is_some() {
            return Err(FleetError::ClearanceDenied {
                reason: DenialReason::TargetAlreadyClaimed,
            });
        }

        let world = self.world.lock();
        let idle = ledger.idle_agents(&world);
        let chosen = nearest_agent(
            idle.iter()
                .filter(|(id, _)| !busy.contains(id))
                .map(|(id, pose)| (id.as_str(), *pose)),
            failed.target,
            failed_agent,
        )
        .ok_or(FleetError::NoIdleAgents {
            target: failed.target,
        })?
        .to_string();
        drop(world);
        ledger.reconcile_stale(&chosen);

        let task = Task {
            task_id: failed.retry_id(),
            agent_id: chosen,
            target: failed.target,
            status: TaskStatus::Assigned,
        };
        ledger.install(task.clone());
        info!(
            from = failed_agent,
            to = %task.agent_id,
            task_id = %task.task_id,
            target = %task.target,
            "task reallocated"
        );
        Ok(task)
    }

    pub fn task(&self, agent: &str) -> Option<Task> {
        self.ledger.lock().current.get(agent).cloned()
    }

    /// Current task per agent, in agent id order.
    pub fn tasks(&self) -> Vec<Task> {
        self.ledger.lock().current.values().cloned().collect()
    }

    pub fn archive(&self) -> Vec<Task> {
        self.ledger.lock().archive.clone()
    }

    /// Drop all bookkeeping (fresh evaluation trials).
    pub fn reset(&self) {
        let mut ledger = self.ledger.lock();
        ledger.current.clear();
        ledger.archive.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::grid::WorldParams;

    fn coordinator(starts: &[(&str, Pos)]) -> TaskCoordinator {
        let world = GridWorld::new(WorldParams::default(), starts.iter().copied());
        TaskCoordinator::new(Arc::new(Mutex::new(world)))
    }

    #[test]
    fn assign_uses_default_id_and_requires_idle() {
        let coord = coordinator(&[("robot_1", Pos::new(0, 0))]);
        let task = coord.assign("robot_1", Pos::new(7, 9)).expect("assign");
        assert_eq!(task.task_id, "task_robot_1_7_9");
        assert_eq!(task.status, TaskStatus::Assigned);

        coord
            .world()
            .lock()
            .navigate("robot_1", Pos::new(7, 9))
            .expect("navigate");
        assert!(matches!(
            coord.assign("robot_1", Pos::new(1, 1)),
            Err(FleetError::AgentBusy { .. })
        ));
        assert!(matches!(
            coord.assign("ghost", Pos::new(1, 1)),
            Err(FleetError::UnknownAgent { .. })
        ));
    }

    #[test]
    fn assign_refuses_a_claimed_target() {
        let coord = coordinator(&[("a", Pos::new(0, 0)), ("b", Pos::new(1, 0))]);
        coord.assign("a", Pos::new(5, 9)).expect("assign");
        assert_eq!(
            coord.assign("b", Pos::new(5, 9)),
            Err(FleetError::ClearanceDenied {
                reason: DenialReason::TargetAlreadyClaimed
            })
        );
    }

    #[test]
    fn mark_complete_is_idempotent_and_needs_a_task() {
        let coord = coordinator(&[("robot_1", Pos::new(0, 0))]);
        assert!(matches!(
            coord.mark_complete("robot_1", true),
            Err(FleetError::NoActiveTask { .. })
        ));
        coord.assign("robot_1", Pos::new(2, 2)).expect("assign");
        let done = coord.mark_complete("robot_1", true).expect("complete");
        assert_eq!(done.status, TaskStatus::Complete);
        let again = coord.mark_complete("robot_1", false).expect("again");
        assert_eq!(again.status, TaskStatus::Complete);
    }

    #[test]
    fn idle_agents_reconcile_stale_paperwork() {
        let coord = coordinator(&[("a", Pos::new(0, 0)), ("b", Pos::new(3, 3)), ("c", Pos::new(9, 9))]);
        coord.assign("a", Pos::new(4, 4)).expect("assign a");
        coord.assign("b", Pos::new(3, 3)).expect("assign b");
        coord.assign("c", Pos::new(8, 8)).expect("assign c");
        coord.mark_complete("c", false).expect("fail c");
        // a: open task away from target; b: idle on its target; c: terminal.
        assert_eq!(coord.idle_agents(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn reallocate_picks_nearest_idle_agent() {
        let coord = coordinator(&[
            ("robot_1", Pos::new(6, 6)),
            ("robot_2", Pos::new(4, 8)),
            ("robot_3", Pos::new(0, 0)),
        ]);
        coord.assign("robot_1", Pos::new(5, 9)).expect("assign");
        coord.mark_complete("robot_1", false).expect("fail");

        let retry = coord
            .reallocate("robot_1", &BTreeSet::new())
            .expect("reallocate");
        assert_eq!(retry.agent_id, "robot_2");
        assert_eq!(retry.task_id, "task_robot_1_5_9_retry");
        assert_eq!(retry.target, Pos::new(5, 9));
        assert_eq!(retry.status, TaskStatus::Assigned);
        assert_eq!(
            coord.task("robot_1").expect("original").status,
            TaskStatus::Failed
        );
    }

    #[test]
    fn reallocate_without_idle_agents_fails() {
        let coord = coordinator(&[("robot_1", Pos::new(6, 6)), ("robot_2", Pos::new(0, 0))]);
        coord.assign("robot_1", Pos::new(5, 9)).expect("assign");
        coord.mark_complete("robot_1", false).expect("fail");
        coord
            .world()
            .lock()
            .navigate("robot_2", Pos::new(2, 2))
            .expect("navigate");
        assert_eq!(
            coord.reallocate("robot_1", &BTreeSet::new()),
            Err(FleetError::NoIdleAgents {
                target: Pos::new(5, 9)
            })
        );
        assert!(matches!(
            coord.reallocate("robot_2", &BTreeSet::new()),
            Err(FleetError::NoActiveTask { .. })
        ));
    }

    #[test]
    fn only_failed_tasks_are_reallocated() {
        let coord = coordinator(&[("a", Pos::new(0, 0)), ("b", Pos::new(1, 0)), ("c", Pos::new(9, 9))]);
        coord.assign("a", Pos::new(2, 2)).expect("assign a");
        coord.mark_complete("a", true).expect("complete a");
        assert_eq!(
            coord.reallocate("a", &BTreeSet::new()),
            Err(FleetError::TaskNotFailed {
                agent: "a".to_string(),
                status: "complete".to_string(),
            })
        );

        coord.assign("b", Pos::new(4, 4)).expect("assign b");
        assert!(matches!(
            coord.reallocate("b", &BTreeSet::new()),
            Err(FleetError::TaskNotFailed { .. })
        ));
        assert_eq!(coord.task("b").expect("b").status, TaskStatus::Assigned);
    }

    #[test]
    fn reallocate_skips_busy_agents() {
        let coord = coordinator(&[
            ("robot_1", Pos::new(6, 6)),
            ("robot_2", Pos::new(4, 8)),
            ("robot_3", Pos::new(0, 0)),
        ]);
        coord.assign("robot_1", Pos::new(5, 9)).expect("assign");
        coord.mark_complete("robot_1", false).expect("fail");

        let busy = BTreeSet::from(["robot_2".to_string()]);
        let retry = coord.reallocate("robot_1", &busy).expect("reallocate");
        assert_eq!(retry.agent_id, "robot_3");
        assert!(coord.task("robot_2").is_none());
    }

    #[test]
    fn reallocation_archives_stale_task_of_chosen_agent() {
        let coord = coordinator(&[("a", Pos::new(6, 6)), ("b", Pos::new(3, 3))]);
        coord.assign("a", Pos::new(5, 9)).expect("assign a");
        coord.assign("b", Pos::new(3, 3)).expect("assign b");
        coord.mark_complete("a", false).expect("fail a");

        let retry = coord
            .reallocate("a", &BTreeSet::new())
            .expect("reallocate");
        assert_eq!(retry.agent_id, "b");
        let archive = coord.archive();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].task_id, "task_b_3_3");
        assert_eq!(archive[0].status, TaskStatus::Complete);
        assert_eq!(coord.task("b").expect("retry").task_id, "task_a_5_9_retry");
    }

    #[test]
    fn superseded_terminal_tasks_are_archived() {
        let coord = coordinator(&[("robot_1", Pos::new(0, 0))]);
        coord.assign("robot_1", Pos::new(2, 2)).expect("assign");
        coord.mark_complete("robot_1", true).expect("complete");
        coord.assign("robot_1", Pos::new(3, 3)).expect("assign again");
        let archive = coord.archive();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive[0].task_id, "task_robot_1_2_2");
    }
}
