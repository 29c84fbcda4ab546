//! Fleet runtime: wires the components together and owns the task set.
//!
//! The runtime spawns one [`ExecutionLoop`] per task, collects their reports
//! and performs at most one reallocation per original task after a critical
//! failure.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

use crate::arbiter::ConflictArbiter;
use crate::coordinator::TaskCoordinator;
use crate::core::grid::GridWorld;
use crate::core::types::{AgentState, Pos, Strategy};
use crate::error::FleetError;
use crate::execution::{ExecutionContext, ExecutionLoop, TaskOutcome, TaskReport, TaskSpec};
use crate::io::backend::{MotionBackend, SharedWorld, SimulatedBackend};
use crate::io::config::FleetConfig;
use crate::io::decision::{BoundedDecisions, DecisionPort, DeterministicDecisions};
use crate::io::recovery_store::RecoveryStore;
use crate::io::telemetry::{EventSink, FleetEvent, NullSink};

/// Builds the motion backend over the shared world.
pub type BackendFactory = Box<dyn FnOnce(SharedWorld) -> Arc<dyn MotionBackend> + Send>;

pub struct FleetBuilder {
    config: FleetConfig,
    store: Option<Arc<RecoveryStore>>,
    decisions: Arc<dyn DecisionPort>,
    events: Arc<dyn EventSink>,
    backend: Option<BackendFactory>,
    seed: Option<u64>,
}

impl FleetBuilder {
    /// Defaults to the store at `config.store.path`.
    pub fn with_store(mut self, store: Arc<RecoveryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_decisions(mut self, decisions: Arc<dyn DecisionPort>) -> Self {
        self.decisions = decisions;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Defaults to [`SimulatedBackend`].
    pub fn with_backend(mut self, factory: BackendFactory) -> Self {
        self.backend = Some(factory);
        self
    }

    /// Seed the advisor's tie-breaking for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<Fleet> {
        self.config.validate()?;
        let config = self.config;

        let world: SharedWorld = Arc::new(Mutex::new(GridWorld::new(
            config.world.params(),
            config.world.agents.iter().map(|(id, pos)| (id.clone(), *pos)),
        )));
        let coordinator = Arc::new(TaskCoordinator::new(Arc::clone(&world)));
        let arbiter = Arc::new(ConflictArbiter::new(Arc::clone(&coordinator)));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(RecoveryStore::open(config.store.path.clone())));
        let backend = match self.backend {
            Some(factory) => factory(Arc::clone(&world)),
            None => Arc::new(SimulatedBackend::new(Arc::clone(&world))),
        };

        let ctx = Arc::new(ExecutionContext {
            config: config.execution.clone(),
            arbiter,
            coordinator,
            store,
            backend,
            decisions: BoundedDecisions::new(self.decisions, config.execution.decision_timeout()),
            events: self.events,
        });
        Ok(Fleet {
            config,
            world,
            ctx,
            seed: self.seed,
        })
    }
}

pub struct Fleet {
    config: FleetConfig,
    world: SharedWorld,
    ctx: Arc<ExecutionContext>,
    seed: Option<u64>,
}

impl Fleet {
    pub fn builder(config: FleetConfig) -> FleetBuilder {
        FleetBuilder {
            config,
            store: None,
            decisions: Arc::new(DeterministicDecisions),
            events: Arc::new(NullSink),
            backend: None,
            seed: None,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn world(&self) -> &SharedWorld {
        &self.world
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.ctx.coordinator
    }

    pub fn arbiter(&self) -> &Arc<ConflictArbiter> {
        &self.ctx.arbiter
    }

    pub fn store(&self) -> &Arc<RecoveryStore> {
        &self.ctx.store
    }

    pub fn snapshots(&self) -> Vec<AgentState> {
        self.world.lock().snapshots()
    }

    /// Put every configured agent back on its start cell and drop all task
    /// bookkeeping. Recovery history is kept.
    pub fn reset_positions(&self) {
        self.reset_to(&self.config.world.agents);
    }

    pub fn reset_to(&self, starts: &BTreeMap<String, Pos>) {
        self.ctx.coordinator.reset();
        self.world.lock().reset_positions(starts);
    }

    /// Run every task to a terminal outcome.
    #[instrument(skip_all, fields(tasks = tasks.len()))]
    pub async fn run(&self, tasks: Vec<TaskSpec>) -> FleetReport {
        let deadline = self
            .config
            .execution
            .run_deadline()
            .map(|limit| Instant::now() + limit);
        let stagger = self.config.execution.start_stagger();

        let mut set = JoinSet::new();
        let mut spawned = 0u64;
        // Loops not yet joined per agent, including ones still waiting out their stagger.
        let mut owners: BTreeMap<String, u32> = BTreeMap::new();
        for (index, spec) in tasks.into_iter().enumerate() {
            let delay = stagger.saturating_mul(u32::try_from(index).unwrap_or(u32::MAX));
            *owners.entry(spec.agent.clone()).or_default() += 1;
            self.spawn_loop(&mut set, spec, delay, deadline, spawned);
            spawned += 1;
        }

        let mut report = FleetReport::default();
        while let Some(joined) = set.join_next().await {
            let task_report = match joined {
                Ok(task_report) => task_report,
                Err(err) => {
                    warn!(error = %err, "execution loop crashed");
                    report.crashed.push(err.to_string());
                    continue;
                }
            };
            if let Some(count) = owners.get_mut(&task_report.spec.agent) {
                *count -= 1;
                if *count == 0 {
                    owners.remove(&task_report.spec.agent);
                }
            }

            let needs_retry = matches!(task_report.outcome, TaskOutcome::CriticalFailure { .. })
                && task_report.spec.reallocated_from.is_none();
            if needs_retry {
                let busy: BTreeSet<String> = owners.keys().cloned().collect();
                match self.reallocate(&task_report.spec, &busy) {
                    Ok((retry, record)) => {
                        *owners.entry(retry.agent.clone()).or_default() += 1;
                        self.spawn_loop(&mut set, retry, Duration::ZERO, deadline, spawned);
                        spawned += 1;
                        report.reallocations.push(record);
                    }
                    Err(err) => {
                        warn!(task_id = %task_report.spec.task_id, error = %err, "reallocation failed");
                        report
                            .unreallocated
                            .push(format!("{}: {err}", task_report.spec.task_id));
                    }
                }
            }
            report.reports.push(task_report);
        }

        report.reports.sort_by(|a, b| a.spec.task_id.cmp(&b.spec.task_id));
        info!(
            completed = report.completed_count(),
            total = report.reports.len(),
            reallocations = report.reallocations.len(),
            "fleet run finished"
        );
        report
    }

    fn reallocate(
        &self,
        failed: &TaskSpec,
        busy: &BTreeSet<String>,
    ) -> Result<(TaskSpec, Reallocation), FleetError> {
        let task = self.ctx.coordinator.reallocate(&failed.agent, busy)?;
        self.ctx.events.emit(&FleetEvent::TaskReallocated {
            from: failed.agent.clone(),
            to: task.agent_id.clone(),
            task_id: task.task_id.clone(),
            target: task.target,
        });
        let record = Reallocation {
            from: failed.agent.clone(),
            to: task.agent_id.clone(),
            task_id: task.task_id.clone(),
            target: task.target,
        };
        Ok((TaskSpec::retry_of(&failed.task_id, &task), record))
    }

    fn spawn_loop(
        &self,
        set: &mut JoinSet<TaskReport>,
        spec: TaskSpec,
        delay: Duration,
        deadline: Option<Instant>,
        index: u64,
    ) {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index)),
            None => StdRng::from_entropy(),
        };
        let exec = ExecutionLoop::with_rng(Arc::clone(&self.ctx), spec, rng);
        set.spawn(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            exec.run(deadline).await
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reallocation {
    pub from: String,
    pub to: String,
    pub task_id: String,
    pub target: Pos,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FleetReport {
    /// Sorted by task id.
    pub reports: Vec<TaskReport>,
    pub reallocations: Vec<Reallocation>,
    /// Critical failures that could not be handed to another agent.
    pub unreallocated: Vec<String>,
    /// Loops that panicked.
    pub crashed: Vec<String>,
}

/// Per-agent recovery statistics derived from task reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    pub tasks: u32,
    pub completed: u32,
    pub stuck_events: u32,
    pub recovery_attempts: u32,
    /// Maneuvers applied during tasks that went on to complete.
    pub recovery_successes: u32,
    pub strategies: BTreeMap<Strategy, u32>,
}

impl FleetReport {
    pub fn completed_count(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_success()).count()
    }

    /// Every original task completed, directly or through its retry.
    pub fn all_completed(&self) -> bool {
        self.crashed.is_empty()
            && self
                .reports
                .iter()
                .filter(|report| report.spec.reallocated_from.is_none())
                .all(|original| {
                    original.outcome.is_success()
                        || self.reports.iter().any(|retry| {
                            retry.spec.reallocated_from.as_deref()
                                == Some(original.spec.task_id.as_str())
                                && retry.outcome.is_success()
                        })
                })
    }

    pub fn agent_stats(&self) -> BTreeMap<String, AgentStats> {
        let mut stats: BTreeMap<String, AgentStats> = BTreeMap::new();
        for report in &self.reports {
            let entry = stats.entry(report.spec.agent.clone()).or_default();
            entry.tasks += 1;
            entry.stuck_events += report.stuck_events;
            let applied = u32::try_from(report.recoveries.len()).unwrap_or(u32::MAX);
            entry.recovery_attempts += applied;
            if report.outcome.is_success() {
                entry.completed += 1;
                entry.recovery_successes += applied;
            }
            for step in &report.recoveries {
                *entry.strategies.entry(step.strategy).or_default() += 1;
            }
        }
        stats
    }
}
