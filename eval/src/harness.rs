//! In-process fleet execution for evaluation trials.
//!
//! One harness owns the async runtime and the recovery store shared by every
//! trial of a case, so learning carries over from trial to trial.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tracing::debug;

use fleet::execution::TaskSpec;
use fleet::fleet::{Fleet, FleetReport};
use fleet::io::config::FleetConfig;
use fleet::io::recovery_store::{Durability, RecoveryStore};
use fleet::io::telemetry::{EventSink, FanOut, JsonlSink, TracingSink};

use crate::case::CaseFile;

pub struct Harness {
    runtime: Runtime,
    store: Arc<RecoveryStore>,
}

impl Harness {
    pub fn new(store_path: &Path) -> Result<Self> {
        let runtime = Runtime::new().context("start async runtime")?;
        let store = Arc::new(RecoveryStore::open(store_path));
        if !store.is_durable() {
            debug!(path = %store_path.display(), "trial history will not persist");
        }
        Ok(Self { runtime, store })
    }

    pub fn store(&self) -> &Arc<RecoveryStore> {
        &self.store
    }

    /// Forget everything learned so far.
    pub fn clear_history(&self) -> Durability {
        self.store.clear()
    }

    /// Run one trial from the case's start cells, appending events to `events_path`.
    pub fn run_trial(
        &self,
        config: FleetConfig,
        case: &CaseFile,
        events_path: &Path,
        seed: u64,
    ) -> Result<FleetReport> {
        let events = FanOut::new(vec![
            Arc::new(TracingSink) as Arc<dyn EventSink>,
            Arc::new(JsonlSink::create(events_path)?) as Arc<dyn EventSink>,
        ]);
        let fleet = Fleet::builder(config)
            .with_store(Arc::clone(&self.store))
            .with_events(Arc::new(events))
            .with_seed(seed)
            .build()
            .context("build fleet")?;
        fleet.reset_positions();

        let tasks = task_specs(case);
        debug!(tasks = tasks.len(), seed, "trial starting");
        Ok(self.runtime.block_on(fleet.run(tasks)))
    }
}

/// Tasks in agent id order.
pub fn task_specs(case: &CaseFile) -> Vec<TaskSpec> {
    case.tasks
        .iter()
        .map(|(agent, target)| TaskSpec::new(agent.clone(), *target))
        .collect()
}
