//! Shared deterministic types for the coordination core.
//!
//! These types define stable contracts between components and the persisted
//! history format. They carry no I/O and must stay deterministic across runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Integer grid cell. Serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

impl Pos {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: Pos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl From<[i32; 2]> for Pos {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Pos> for [i32; 2] {
    fn from(pos: Pos) -> Self {
        [pos.x, pos.y]
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Parses `x,y` (whitespace and surrounding parentheses tolerated).
impl FromStr for Pos {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let (x, y) = trimmed
            .split_once(',')
            .ok_or_else(|| format!("expected `x,y`, got {s:?}"))?;
        let x = x
            .trim()
            .parse()
            .map_err(|err| format!("invalid x in {s:?}: {err}"))?;
        let y = y
            .trim()
            .parse()
            .map_err(|err| format!("invalid y in {s:?}: {err}"))?;
        Ok(Pos { x, y })
    }
}

/// Physical status of an agent as tracked by the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Idle,
    Navigating,
    Stuck,
    Recovering,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Idle => "IDLE",
            AgentStatus::Navigating => "NAVIGATING",
            AgentStatus::Stuck => "STUCK",
            AgentStatus::Recovering => "RECOVERING",
        };
        f.write_str(label)
    }
}

/// Full mutable state of one agent. Owned by [`crate::core::grid::GridWorld`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub id: String,
    pub pose: Pos,
    pub target: Pos,
    pub status: AgentStatus,
    pub stuck_counter: u32,
    pub recovery_cooldown: u32,
}

impl AgentState {
    pub fn at_rest(id: impl Into<String>, pose: Pos) -> Self {
        Self {
            id: id.into(),
            pose,
            target: pose,
            status: AgentStatus::Idle,
            stuck_counter: 0,
            recovery_cooldown: 0,
        }
    }
}

/// Axis-aligned hazard rectangle, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardZone {
    pub x_min: i32,
    pub x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl HazardZone {
    pub fn contains(&self, pos: Pos) -> bool {
        (self.x_min..=self.x_max).contains(&pos.x) && (self.y_min..=self.y_max).contains(&pos.y)
    }
}

impl Default for HazardZone {
    fn default() -> Self {
        Self {
            x_min: 5,
            x_max: 7,
            y_min: 5,
            y_max: 7,
        }
    }
}

/// Enumerated recovery maneuvers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    ReverseOnly,
    ReverseAndTurnLeft,
    ReverseAndTurnRight,
    ForwardLeft,
}

impl Strategy {
    /// Candidate order used when no directional preference applies.
    pub const CANDIDATES: [Strategy; 4] = [
        Strategy::ReverseAndTurnRight,
        Strategy::ReverseAndTurnLeft,
        Strategy::ForwardLeft,
        Strategy::ReverseOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::ReverseOnly => "reverse_only",
            Strategy::ReverseAndTurnLeft => "reverse_and_turn_left",
            Strategy::ReverseAndTurnRight => "reverse_and_turn_right",
            Strategy::ForwardLeft => "forward_left",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact-name parse; anything else is [`FleetError::InvalidStrategy`].
impl FromStr for Strategy {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::CANDIDATES
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| FleetError::InvalidStrategy {
                name: s.to_string(),
            })
    }
}

/// Ledger status of a task. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Active,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Active => "active",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub agent_id: String,
    pub target: Pos,
    pub status: TaskStatus,
}

impl Task {
    /// Default id for an assignment: `task_<agent>_<x>_<y>`.
    pub fn default_id(agent_id: &str, target: Pos) -> String {
        format!("task_{}_{}_{}", agent_id, target.x, target.y)
    }

    pub fn retry_id(&self) -> String {
        format!("{}_retry", self.task_id)
    }
}

/// One persisted strategy outcome. Write-once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryExperience {
    #[serde(alias = "robot_id")]
    pub agent_id: String,
    pub location: Pos,
    pub strategy: Strategy,
    pub success: bool,
}

/// Outcomes recorded for one `(agent, location)`, in recorded order.
///
/// Both lists empty means "no data", which is distinct from "all failures".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryHistory {
    pub successes: Vec<Strategy>,
    pub failures: Vec<Strategy>,
}

impl RecoveryHistory {
    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.failures.is_empty()
    }

    pub fn has_failed(&self, strategy: Strategy) -> bool {
        self.failures.contains(&strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pos_serializes_as_pair() {
        let json = serde_json::to_string(&Pos::new(3, -1)).expect("serialize");
        assert_eq!(json, "[3,-1]");
        let back: Pos = serde_json::from_str("[7,9]").expect("deserialize");
        assert_eq!(back, Pos::new(7, 9));
    }

    #[test]
    fn pos_parses_cli_forms() {
        assert_eq!("7,9".parse::<Pos>(), Ok(Pos::new(7, 9)));
        assert_eq!(" (2, 3) ".parse::<Pos>(), Ok(Pos::new(2, 3)));
        assert!("7".parse::<Pos>().is_err());
        assert!("a,b".parse::<Pos>().is_err());
    }

    #[test]
    fn strategy_parse_is_exact() {
        assert_eq!(
            "forward_left".parse::<Strategy>(),
            Ok(Strategy::ForwardLeft)
        );
        let err = "turn_around".parse::<Strategy>().expect_err("unknown");
        assert!(matches!(err, FleetError::InvalidStrategy { name } if name == "turn_around"));
        assert!("Reverse_Only".parse::<Strategy>().is_err());
    }

    #[test]
    fn experience_accepts_legacy_robot_id() {
        let raw = r#"{"robot_id":"robot_1","location":[6,6],"strategy":"reverse_only","success":true}"#;
        let exp: RecoveryExperience = serde_json::from_str(raw).expect("parse");
        assert_eq!(exp.agent_id, "robot_1");
        assert_eq!(exp.strategy, Strategy::ReverseOnly);
    }

    #[test]
    fn hazard_bounds_are_inclusive() {
        let zone = HazardZone::default();
        assert!(zone.contains(Pos::new(5, 5)));
        assert!(zone.contains(Pos::new(7, 7)));
        assert!(!zone.contains(Pos::new(8, 6)));
        assert!(!zone.contains(Pos::new(6, 4)));
    }
}
