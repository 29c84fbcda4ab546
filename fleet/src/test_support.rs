//! Test-only fixtures: fast configs, scripted decision layers, temp stores.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::core::types::{HazardZone, Pos};
use crate::io::config::FleetConfig;
use crate::io::decision::{ClearanceVerdict, DecisionPort, ManeuverRequest};
use crate::io::recovery_store::RecoveryStore;

/// Default config with millisecond pacing and short backoff.
pub fn fast_config() -> FleetConfig {
    let mut cfg = FleetConfig::default();
    let exec = &mut cfg.execution;
    exec.tick_interval_ms = 1;
    exec.settle_delay_ms = 0;
    exec.backoff_base_ms = 10;
    exec.backoff_cap_ms = 80;
    exec.clearance_attempts = 5;
    exec.decision_timeout_ms = 100;
    cfg
}

/// Agent id to start cell, from literal pairs.
pub fn starts(cells: &[(&str, (i32, i32))]) -> BTreeMap<String, Pos> {
    cells
        .iter()
        .map(|(id, (x, y))| ((*id).to_string(), Pos::new(*x, *y)))
        .collect()
}

/// Hazard covering the whole default grid.
pub fn everywhere_hazard() -> HazardZone {
    HazardZone {
        x_min: 0,
        x_max: 10,
        y_min: 0,
        y_max: 10,
    }
}

/// Store persisted inside a fresh temp directory. Keep the `TempDir` alive.
pub fn temp_store() -> (TempDir, Arc<RecoveryStore>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = RecoveryStore::open(dir.path().join("recovery_history.json"));
    (dir, Arc::new(store))
}

/// Decision layer that replays canned answers and records what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedDecisions {
    vetoed: BTreeSet<Pos>,
    maneuvers: Mutex<VecDeque<String>>,
    navigation: Option<Pos>,
    seen: Mutex<Vec<ManeuverRequest>>,
}

impl ScriptedDecisions {
    pub fn veto(mut self, target: Pos) -> Self {
        self.vetoed.insert(target);
        self
    }

    /// Answers handed out in order; silence once exhausted.
    pub fn maneuvers<I, S>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.maneuvers
            .lock()
            .extend(answers.into_iter().map(Into::into));
        self
    }

    pub fn navigate_to(mut self, cell: Pos) -> Self {
        self.navigation = Some(cell);
        self
    }

    pub fn requests(&self) -> Vec<ManeuverRequest> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl DecisionPort for ScriptedDecisions {
    async fn review_clearance(&self, _agent: &str, target: Pos) -> Option<ClearanceVerdict> {
        if self.vetoed.contains(&target) {
            Some(ClearanceVerdict::Veto)
        } else {
            Some(ClearanceVerdict::Approve)
        }
    }

    async fn choose_maneuver(&self, request: &ManeuverRequest) -> Option<String> {
        self.seen.lock().push(request.clone());
        self.maneuvers.lock().pop_front()
    }

    async fn navigation_target(&self, _agent: &str, _pose: Pos, _target: Pos) -> Option<Pos> {
        self.navigation
    }
}
