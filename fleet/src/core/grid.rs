//! Deterministic grid physics: movement, hazard exposure, recovery maneuvers.

use std::collections::BTreeMap;

use crate::core::types::{AgentState, AgentStatus, HazardZone, Pos, Strategy};
use crate::error::FleetError;

/// Static world parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldParams {
    /// Cells run from `0` to `grid_size` inclusive on both axes.
    pub grid_size: i32,
    pub hazard: HazardZone,
    /// Consecutive in-zone ticks before an agent becomes STUCK.
    pub stuck_threshold: u32,
    /// Ticks of hazard immunity granted by a recovery maneuver.
    pub recovery_cooldown: u32,
}

impl Default for WorldParams {
    fn default() -> Self {
        Self {
            grid_size: 10,
            hazard: HazardZone::default(),
            stuck_threshold: 2,
            recovery_cooldown: 10,
        }
    }
}

/// What a single tick did to one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Agent was not navigating.
    Inactive,
    Moved { to: Pos },
    /// Arrived at (or was already on) the target; now IDLE.
    Arrived { at: Pos },
    /// Hazard threshold reached; agent did not move.
    BecameStuck { at: Pos },
}

#[derive(Debug, Clone)]
pub struct GridWorld {
    params: WorldParams,
    agents: BTreeMap<String, AgentState>,
}

impl GridWorld {
    pub fn new<I, S>(params: WorldParams, starts: I) -> Self
    where
        I: IntoIterator<Item = (S, Pos)>,
        S: Into<String>,
    {
        let agents = starts
            .into_iter()
            .map(|(id, pose)| {
                let id = id.into();
                (id.clone(), AgentState::at_rest(id, pose))
            })
            .collect();
        Self { params, agents }
    }

    pub fn params(&self) -> &WorldParams {
        &self.params
    }

    pub fn agent(&self, id: &str) -> Result<&AgentState, FleetError> {
        self.agents
            .get(id)
            .ok_or_else(|| FleetError::unknown_agent(id))
    }

    fn agent_mut(&mut self, id: &str) -> Result<&mut AgentState, FleetError> {
        self.agents
            .get_mut(id)
            .ok_or_else(|| FleetError::unknown_agent(id))
    }

    /// Agents in id order.
    pub fn agents(&self) -> impl Iterator<Item = &AgentState> {
        self.agents.values()
    }

    pub fn snapshot(&self, id: &str) -> Result<AgentState, FleetError> {
        self.agent(id).cloned()
    }

    pub fn snapshots(&self) -> Vec<AgentState> {
        self.agents.values().cloned().collect()
    }

    pub fn in_bounds(&self, pos: Pos) -> bool {
        (0..=self.params.grid_size).contains(&pos.x) && (0..=self.params.grid_size).contains(&pos.y)
    }

    pub fn ensure_in_bounds(&self, pos: Pos) -> Result<(), FleetError> {
        if self.in_bounds(pos) {
            Ok(())
        } else {
            Err(FleetError::OutOfBounds {
                pos,
                size: self.params.grid_size,
            })
        }
    }

    /// Set a navigation intent. A STUCK agent must be recovered first.
    pub fn navigate(&mut self, id: &str, target: Pos) -> Result<(), FleetError> {
        self.ensure_in_bounds(target)?;
        let agent = self.agent_mut(id)?;
        if matches!(agent.status, AgentStatus::Stuck | AgentStatus::Recovering) {
            return Err(FleetError::AgentBusy {
                agent: id.to_string(),
                status: agent.status.to_string(),
            });
        }
        agent.target = target;
        agent.status = AgentStatus::Navigating;
        agent.stuck_counter = 0;
        Ok(())
    }

    /// Tick one agent, or every agent in id order when `id` is `None`.
    pub fn tick(&mut self, id: Option<&str>) -> Result<Vec<(String, TickOutcome)>, FleetError> {
        match id {
            Some(id) => {
                let outcome = self.tick_agent(id)?;
                Ok(vec![(id.to_string(), outcome)])
            }
            None => {
                let ids: Vec<String> = self.agents.keys().cloned().collect();
                let mut outcomes = Vec::with_capacity(ids.len());
                for id in ids {
                    let outcome = self.tick_agent(&id)?;
                    outcomes.push((id, outcome));
                }
                Ok(outcomes)
            }
        }
    }

    /// Advance one agent by a single step, X fully before Y.
    ///
    /// The hazard check runs before movement. Cooldown is decremented first,
    /// so the tick on which it reaches zero already counts toward exposure.
    pub fn tick_agent(&mut self, id: &str) -> Result<TickOutcome, FleetError> {
        let params = self.params;
        let agent = self.agent_mut(id)?;
        if agent.status != AgentStatus::Navigating {
            return Ok(TickOutcome::Inactive);
        }

        if agent.recovery_cooldown > 0 {
            agent.recovery_cooldown -= 1;
        }

        if agent.recovery_cooldown == 0 && params.hazard.contains(agent.pose) {
            agent.stuck_counter += 1;
            if agent.stuck_counter >= params.stuck_threshold {
                agent.status = AgentStatus::Stuck;
                return Ok(TickOutcome::BecameStuck { at: agent.pose });
            }
        } else {
            agent.stuck_counter = 0;
        }

        let (pose, target) = (agent.pose, agent.target);
        if pose.x != target.x {
            agent.pose.x += (target.x - pose.x).signum();
        } else if pose.y != target.y {
            agent.pose.y += (target.y - pose.y).signum();
        }

        if agent.pose == agent.target {
            agent.status = AgentStatus::Idle;
            return Ok(TickOutcome::Arrived { at: agent.pose });
        }
        Ok(TickOutcome::Moved { to: agent.pose })
    }

    /// Mark a STUCK agent as mid-recovery.
    pub fn begin_recovery(&mut self, id: &str) -> Result<(), FleetError> {
        let agent = self.agent_mut(id)?;
        match agent.status {
            AgentStatus::Stuck | AgentStatus::Recovering => {
                agent.status = AgentStatus::Recovering;
                Ok(())
            }
            _ => Err(FleetError::NotStuck {
                agent: id.to_string(),
            }),
        }
    }

    /// Apply a maneuver by name. Unknown names are rejected, never defaulted.
    pub fn apply_recovery(&mut self, id: &str, strategy: &str) -> Result<Pos, FleetError> {
        let strategy: Strategy = strategy.parse()?;
        self.apply_maneuver(id, strategy)
    }

    /// Relocate a STUCK agent just outside the hazard boundary.
    ///
    /// On success the agent is IDLE with a fresh cooldown; its target is kept.
    pub fn apply_maneuver(&mut self, id: &str, strategy: Strategy) -> Result<Pos, FleetError> {
        let params = self.params;
        let agent = self.agent_mut(id)?;
        if !matches!(agent.status, AgentStatus::Stuck | AgentStatus::Recovering) {
            return Err(FleetError::NotStuck {
                agent: id.to_string(),
            });
        }

        let zone = params.hazard;
        let Pos { x, y } = agent.pose;
        let raw = match strategy {
            Strategy::ReverseAndTurnLeft => Pos::new(zone.x_min - 1, y),
            Strategy::ReverseAndTurnRight => Pos::new(zone.x_max + 1, y),
            Strategy::ForwardLeft => Pos::new(x, zone.y_min - 1),
            Strategy::ReverseOnly => Pos::new(x, zone.y_max + 1),
        };
        let pose = Pos::new(
            raw.x.clamp(0, params.grid_size),
            raw.y.clamp(0, params.grid_size),
        );

        agent.pose = pose;
        agent.status = AgentStatus::Idle;
        agent.stuck_counter = 0;
        agent.recovery_cooldown = params.recovery_cooldown;
        Ok(pose)
    }

    /// True if another agent is heading to `target` or already standing on it.
    pub fn check_conflict(&self, id: &str, target: Pos) -> bool {
        self.agents.values().any(|other| {
            other.id != id
                && ((other.target == target && other.status == AgentStatus::Navigating)
                    || other.pose == target)
        })
    }

    /// Reinitialize the named agents at rest on the given cells, adding any
    /// that are not yet known.
    pub fn reset_positions<'a, I>(&mut self, positions: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Pos)>,
    {
        for (id, pose) in positions {
            self.agents
                .insert(id.clone(), AgentState::at_rest(id.clone(), *pose));
        }
    }

    /// Mirror an externally observed pose and status (hardware-bound backends).
    pub fn observe(&mut self, id: &str, pose: Pos, status: AgentStatus) -> Result<(), FleetError> {
        let agent = self.agent_mut(id)?;
        agent.pose = pose;
        agent.status = status;
        if status == AgentStatus::Idle {
            agent.stuck_counter = 0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with(id: &str, pose: Pos) -> GridWorld {
        GridWorld::new(WorldParams::default(), [(id, pose)])
    }

    fn run_until_stuck(world: &mut GridWorld, id: &str, max: usize) -> Option<Pos> {
        for _ in 0..max {
            if let TickOutcome::BecameStuck { at } = world.tick_agent(id).expect("tick") {
                return Some(at);
            }
        }
        None
    }

    #[test]
    fn tick_outside_zone_reduces_distance_by_one() {
        let mut world = world_with("r", Pos::new(0, 0));
        world.navigate("r", Pos::new(3, 2)).expect("navigate");
        let mut previous = Pos::new(0, 0).manhattan(Pos::new(3, 2));
        for _ in 0..4 {
            world.tick_agent("r").expect("tick");
            let agent = world.agent("r").expect("agent");
            let distance = agent.pose.manhattan(agent.target);
            assert_eq!(distance, previous - 1);
            previous = distance;
        }
        assert_eq!(world.tick_agent("r"), Ok(TickOutcome::Arrived { at: Pos::new(3, 2) }));
        assert_eq!(world.agent("r").expect("agent").status, AgentStatus::Idle);
    }

    #[test]
    fn resolves_x_before_y() {
        let mut world = world_with("r", Pos::new(1, 1));
        world.navigate("r", Pos::new(3, 3)).expect("navigate");
        world.tick_agent("r").expect("tick");
        world.tick_agent("r").expect("tick");
        assert_eq!(world.agent("r").expect("agent").pose, Pos::new(3, 1));
    }

    #[test]
    fn non_navigating_agents_do_not_move() {
        let mut world = world_with("r", Pos::new(1, 1));
        assert_eq!(world.tick_agent("r"), Ok(TickOutcome::Inactive));
        assert_eq!(world.agent("r").expect("agent").pose, Pos::new(1, 1));
    }

    #[test]
    fn northbound_crossing_gets_stuck_and_recovers_right() {
        let mut world = world_with("r", Pos::new(6, 2));
        world.navigate("r", Pos::new(6, 8)).expect("navigate");

        let at = run_until_stuck(&mut world, "r", 20).expect("stuck");
        assert_eq!(at, Pos::new(6, 6));
        let agent = world.agent("r").expect("agent");
        assert_eq!(agent.status, AgentStatus::Stuck);
        assert_eq!(agent.stuck_counter, 2);

        // Stationary while stuck.
        assert_eq!(world.tick_agent("r"), Ok(TickOutcome::Inactive));
        assert_eq!(world.agent("r").expect("agent").pose, Pos::new(6, 6));

        let pose = world
            .apply_recovery("r", "reverse_and_turn_right")
            .expect("recover");
        assert_eq!(pose, Pos::new(8, 6));
        let agent = world.agent("r").expect("agent");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.recovery_cooldown, 10);
        assert_eq!(agent.stuck_counter, 0);
        assert_eq!(agent.target, Pos::new(6, 8));
    }

    #[test]
    fn cooldown_tick_resets_counter_inside_zone() {
        let mut world = world_with("r", Pos::new(6, 4));
        world.navigate("r", Pos::new(6, 9)).expect("navigate");
        world.tick_agent("r").expect("tick");
        world.tick_agent("r").expect("tick");
        assert_eq!(world.agent("r").expect("agent").stuck_counter, 1);

        world.agents.get_mut("r").expect("agent").recovery_cooldown = 5;
        world.tick_agent("r").expect("tick");
        let agent = world.agent("r").expect("agent");
        assert_eq!(agent.stuck_counter, 0);
        assert_eq!(agent.recovery_cooldown, 4);
        assert_eq!(agent.status, AgentStatus::Navigating);
    }

    #[test]
    fn maneuvers_clamp_to_grid() {
        let params = WorldParams {
            hazard: HazardZone {
                x_min: 0,
                x_max: 10,
                y_min: 0,
                y_max: 10,
            },
            stuck_threshold: 1,
            ..WorldParams::default()
        };
        let mut world = GridWorld::new(params, [("r", Pos::new(2, 2))]);
        world.navigate("r", Pos::new(2, 5)).expect("navigate");
        run_until_stuck(&mut world, "r", 3).expect("stuck");
        let pose = world.apply_maneuver("r", Strategy::ReverseAndTurnLeft).expect("recover");
        assert_eq!(pose, Pos::new(0, 2));

        world.navigate("r", Pos::new(0, 5)).expect("navigate");
        world.agents.get_mut("r").expect("agent").status = AgentStatus::Stuck;
        let pose = world.apply_maneuver("r", Strategy::ReverseOnly).expect("recover");
        assert_eq!(pose, Pos::new(0, 10));
    }

    #[test]
    fn recovery_rejects_unknown_names_and_idle_agents() {
        let mut world = world_with("r", Pos::new(6, 6));
        assert!(matches!(
            world.apply_recovery("r", "spin"),
            Err(FleetError::InvalidStrategy { .. })
        ));
        assert!(matches!(
            world.apply_recovery("r", "forward_left"),
            Err(FleetError::NotStuck { .. })
        ));
        assert!(matches!(
            world.apply_recovery("ghost", "forward_left"),
            Err(FleetError::UnknownAgent { .. })
        ));
    }

    #[test]
    fn conflict_covers_occupancy_and_inbound_navigation() {
        let mut world = GridWorld::new(
            WorldParams::default(),
            [("a", Pos::new(0, 0)), ("b", Pos::new(3, 3))],
        );
        assert!(world.check_conflict("a", Pos::new(3, 3)));
        assert!(!world.check_conflict("b", Pos::new(3, 3)));
        assert!(!world.check_conflict("a", Pos::new(5, 9)));

        world.navigate("b", Pos::new(5, 9)).expect("navigate");
        assert!(world.check_conflict("a", Pos::new(5, 9)));
    }

    #[test]
    fn reset_positions_restores_rest_state() {
        let mut world = world_with("r", Pos::new(0, 0));
        world.navigate("r", Pos::new(4, 0)).expect("navigate");
        world.tick_agent("r").expect("tick");
        let starts = BTreeMap::from([
            ("r".to_string(), Pos::new(2, 2)),
            ("s".to_string(), Pos::new(9, 9)),
        ]);
        world.reset_positions(&starts);
        let r = world.agent("r").expect("r");
        assert_eq!(r.pose, Pos::new(2, 2));
        assert_eq!(r.target, Pos::new(2, 2));
        assert_eq!(r.status, AgentStatus::Idle);
        assert_eq!(world.agent("s").expect("s").pose, Pos::new(9, 9));
    }

    #[test]
    fn navigate_rejects_out_of_bounds_targets() {
        let mut world = world_with("r", Pos::new(0, 0));
        assert!(matches!(
            world.navigate("r", Pos::new(11, 0)),
            Err(FleetError::OutOfBounds { .. })
        ));
    }
}
