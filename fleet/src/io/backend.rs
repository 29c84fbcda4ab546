//! Motion backends: the capability surface execution loops drive.
//!
//! [`SimulatedBackend`] steps the shared [`GridWorld`] directly.
//! [`HardwareBackend`] forwards commands to a [`HardwareLink`] driver and
//! mirrors what it observes back into the world so clearance checks see the
//! same poses either way. The variant is chosen when the fleet is built.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::core::grid::{GridWorld, TickOutcome};
use crate::core::types::{AgentState, AgentStatus, Pos, Strategy};
use crate::error::FleetError;

pub type SharedWorld = Arc<Mutex<GridWorld>>;

#[async_trait]
pub trait MotionBackend: Send + Sync {
    /// Issue a navigation intent toward `target`.
    async fn move_to(&self, agent: &str, target: Pos) -> Result<(), FleetError>;

    /// Advance the agent by one control step.
    async fn advance(&self, agent: &str) -> Result<TickOutcome, FleetError>;

    async fn status(&self, agent: &str) -> Result<AgentState, FleetError>;

    /// Flag a STUCK agent as mid-recovery before a maneuver is chosen.
    async fn begin_recovery(&self, agent: &str) -> Result<(), FleetError>;

    /// Execute a named maneuver; unknown names fail with `InvalidStrategy`.
    async fn recover(&self, agent: &str, strategy: &str) -> Result<Pos, FleetError>;
}

#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    world: SharedWorld,
}

impl SimulatedBackend {
    pub fn new(world: SharedWorld) -> Self {
        Self { world }
    }
}

#[async_trait]
impl MotionBackend for SimulatedBackend {
    async fn move_to(&self, agent: &str, target: Pos) -> Result<(), FleetError> {
        self.world.lock().navigate(agent, target)
    }

    async fn advance(&self, agent: &str) -> Result<TickOutcome, FleetError> {
        self.world.lock().tick_agent(agent)
    }

    async fn status(&self, agent: &str) -> Result<AgentState, FleetError> {
        self.world.lock().snapshot(agent)
    }

    async fn begin_recovery(&self, agent: &str) -> Result<(), FleetError> {
        self.world.lock().begin_recovery(agent)
    }

    async fn recover(&self, agent: &str, strategy: &str) -> Result<Pos, FleetError> {
        self.world.lock().apply_recovery(agent, strategy)
    }
}

/// Pose and status reported by a physical driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub pose: Pos,
    pub status: AgentStatus,
}

/// Driver port for physical agents.
#[async_trait]
pub trait HardwareLink: Send + Sync {
    async fn command_goal(&self, agent: &str, target: Pos) -> Result<(), FleetError>;

    async fn poll(&self, agent: &str) -> Result<Observation, FleetError>;

    /// Execute the maneuver and report the pose the agent ended up at.
    async fn execute_maneuver(&self, agent: &str, strategy: Strategy) -> Result<Pos, FleetError>;
}

pub struct HardwareBackend<L> {
    link: L,
    world: SharedWorld,
}

impl<L: HardwareLink> HardwareBackend<L> {
    pub fn new(link: L, world: SharedWorld) -> Self {
        Self { link, world }
    }
}

#[async_trait]
impl<L: HardwareLink> MotionBackend for HardwareBackend<L> {
    async fn move_to(&self, agent: &str, target: Pos) -> Result<(), FleetError> {
        self.world.lock().ensure_in_bounds(target)?;
        self.link.command_goal(agent, target).await?;
        self.world.lock().navigate(agent, target)
    }

    async fn advance(&self, agent: &str) -> Result<TickOutcome, FleetError> {
        let observed = self.link.poll(agent).await?;
        let mut world = self.world.lock();
        let target = world.agent(agent)?.target;
        world.observe(agent, observed.pose, observed.status)?;
        debug!(agent, pose = %observed.pose, status = %observed.status, "hardware observation mirrored");
        Ok(match observed.status {
            AgentStatus::Stuck => TickOutcome::BecameStuck { at: observed.pose },
            AgentStatus::Idle if observed.pose == target => TickOutcome::Arrived { at: observed.pose },
            AgentStatus::Navigating | AgentStatus::Recovering => {
                TickOutcome::Moved { to: observed.pose }
            }
            AgentStatus::Idle => TickOutcome::Inactive,
        })
    }

    async fn status(&self, agent: &str) -> Result<AgentState, FleetError> {
        self.world.lock().snapshot(agent)
    }

    async fn begin_recovery(&self, agent: &str) -> Result<(), FleetError> {
        self.world.lock().begin_recovery(agent)
    }

    async fn recover(&self, agent: &str, strategy: &str) -> Result<Pos, FleetError> {
        let strategy: Strategy = strategy.parse()?;
        let status = self.world.lock().agent(agent)?.status;
        if !matches!(status, AgentStatus::Stuck | AgentStatus::Recovering) {
            return Err(FleetError::NotStuck {
                agent: agent.to_string(),
            });
        }
        let pose = self.link.execute_maneuver(agent, strategy).await?;
        self.world.lock().observe(agent, pose, AgentStatus::Idle)?;
        Ok(pose)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::core::grid::WorldParams;

    fn shared_world(id: &str, pose: Pos) -> SharedWorld {
        Arc::new(Mutex::new(GridWorld::new(WorldParams::default(), [(id, pose)])))
    }

    #[tokio::test]
    async fn simulated_backend_drives_world() {
        let world = shared_world("r", Pos::new(0, 0));
        let backend = SimulatedBackend::new(world.clone());
        backend.move_to("r", Pos::new(0, 2)).await.expect("move");
        assert_eq!(
            backend.advance("r").await,
            Ok(TickOutcome::Moved { to: Pos::new(0, 1) })
        );
        assert_eq!(
            backend.advance("r").await,
            Ok(TickOutcome::Arrived { at: Pos::new(0, 2) })
        );
        assert_eq!(world.lock().agent("r").expect("agent").pose, Pos::new(0, 2));
    }

    #[derive(Default)]
    struct FakeLink {
        polls: Mutex<VecDeque<Observation>>,
        goals: Mutex<Vec<Pos>>,
    }

    #[async_trait]
    impl HardwareLink for FakeLink {
        async fn command_goal(&self, _agent: &str, target: Pos) -> Result<(), FleetError> {
            self.goals.lock().push(target);
            Ok(())
        }

        async fn poll(&self, agent: &str) -> Result<Observation, FleetError> {
            self.polls
                .lock()
                .pop_front()
                .ok_or_else(|| FleetError::Hardware {
                    agent: agent.to_string(),
                    message: "no telemetry".to_string(),
                })
        }

        async fn execute_maneuver(&self, _agent: &str, _strategy: Strategy) -> Result<Pos, FleetError> {
            Ok(Pos::new(8, 6))
        }
    }

    #[tokio::test]
    async fn hardware_backend_mirrors_observations() {
        let world = shared_world("r", Pos::new(6, 4));
        let link = FakeLink::default();
        link.polls.lock().extend([
            Observation {
                pose: Pos::new(6, 6),
                status: AgentStatus::Stuck,
            },
            Observation {
                pose: Pos::new(6, 8),
                status: AgentStatus::Idle,
            },
        ]);
        let backend = HardwareBackend::new(link, world.clone());

        backend.move_to("r", Pos::new(6, 8)).await.expect("move");
        assert_eq!(backend.link.goals.lock().as_slice(), &[Pos::new(6, 8)]);
        assert_eq!(
            backend.advance("r").await,
            Ok(TickOutcome::BecameStuck { at: Pos::new(6, 6) })
        );
        assert!(world.lock().check_conflict("other", Pos::new(6, 6)));

        let pose = backend.recover("r", "reverse_and_turn_right").await.expect("recover");
        assert_eq!(pose, Pos::new(8, 6));
        assert_eq!(world.lock().agent("r").expect("agent").status, AgentStatus::Idle);

        backend.move_to("r", Pos::new(6, 8)).await.expect("move");
        assert_eq!(
            backend.advance("r").await,
            Ok(TickOutcome::Arrived { at: Pos::new(6, 8) })
        );
        assert!(matches!(
            backend.advance("r").await,
            Err(FleetError::Hardware { .. })
        ));
    }

    #[tokio::test]
    async fn hardware_backend_rejects_unknown_maneuvers() {
        let world = shared_world("r", Pos::new(6, 6));
        let backend = HardwareBackend::new(FakeLink::default(), world);
        assert!(matches!(
            backend.recover("r", "teleport").await,
            Err(FleetError::InvalidStrategy { .. })
        ));
    }
}
