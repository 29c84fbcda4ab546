//! Per-agent execution loop: clearance, navigation, recovery, completion.
//!
//! One loop instance drives one task for one agent. Loops share state only
//! through the arbiter, the coordinator, the recovery store and the world.
//! Reallocation after a critical failure belongs to the task owner
//! ([`crate::fleet::Fleet`]), never to the loop itself.

use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::arbiter::{Clearance, ConflictArbiter};
use crate::coordinator::TaskCoordinator;
use crate::core::advisor::recommend;
use crate::core::types::{AgentStatus, Pos, Strategy, Task};
use crate::error::{DenialReason, FleetError};
use crate::io::backend::MotionBackend;
use crate::io::config::ExecutionConfig;
use crate::io::decision::{BoundedDecisions, ManeuverRequest, ManeuverSource};
use crate::io::recovery_store::{Durability, RecoveryStore};
use crate::io::telemetry::{EventSink, FleetEvent};

/// Work item for one loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub agent: String,
    pub target: Pos,
    /// Id of the task this one was reallocated from.
    pub reallocated_from: Option<String>,
}

impl TaskSpec {
    pub fn new(agent: impl Into<String>, target: Pos) -> Self {
        let agent = agent.into();
        Self {
            task_id: Task::default_id(&agent, target),
            agent,
            target,
            reallocated_from: None,
        }
    }

    pub fn retry_of(original: &str, task: &Task) -> Self {
        Self {
            task_id: task.task_id.clone(),
            agent: task.agent_id.clone(),
            target: task.target,
            reallocated_from: Some(original.to_string()),
        }
    }
}

/// Phase the loop is in; surfaced in traces and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    RequestingClearance,
    Navigating,
    Recovering,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    ClearanceDenied { reason: DenialReason, attempts: u32 },
    CriticalFailure { recoveries: u32 },
    Timeout { ticks: u32 },
    /// Contract violation or backend failure; fatal to this task only.
    Aborted { error: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::ClearanceDenied { .. } => "clearance_denied",
            TaskOutcome::CriticalFailure { .. } => "critical_failure",
            TaskOutcome::Timeout { .. } => "timeout",
            TaskOutcome::Aborted { .. } => "aborted",
        }
    }
}

/// One maneuver applied during a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryStep {
    pub location: Pos,
    pub strategy: Strategy,
    pub chosen_by: ManeuverSource,
    pub new_pose: Pos,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub spec: TaskSpec,
    pub outcome: TaskOutcome,
    pub phase: LoopPhase,
    pub clearance_attempts: u32,
    pub ticks: u32,
    /// STUCK episodes observed, including the one that tripped a critical failure.
    pub stuck_events: u32,
    pub recoveries: Vec<RecoveryStep>,
    pub duration_ms: u64,
}

impl TaskReport {
    pub fn agent(&self) -> &str {
        &self.spec.agent
    }
}

/// Shared dependencies for every loop in a run.
pub struct ExecutionContext {
    pub config: ExecutionConfig,
    pub arbiter: Arc<ConflictArbiter>,
    pub coordinator: Arc<TaskCoordinator>,
    pub store: Arc<RecoveryStore>,
    pub backend: Arc<dyn MotionBackend>,
    pub decisions: BoundedDecisions,
    pub events: Arc<dyn EventSink>,
}

#[derive(Debug, Default)]
struct Progress {
    clearance_attempts: u32,
    ticks: u32,
    stuck_events: u32,
    recoveries: Vec<RecoveryStep>,
}

pub struct ExecutionLoop {
    ctx: Arc<ExecutionContext>,
    spec: TaskSpec,
    rng: StdRng,
    phase: LoopPhase,
    progress: Progress,
}

impl ExecutionLoop {
    pub fn new(ctx: Arc<ExecutionContext>, spec: TaskSpec) -> Self {
        Self::with_rng(ctx, spec, StdRng::from_entropy())
    }

    /// Seeded randomness for the advisor's tie-breaking.
    pub fn with_rng(ctx: Arc<ExecutionContext>, spec: TaskSpec, rng: StdRng) -> Self {
        Self {
            ctx,
            spec,
            rng,
            phase: LoopPhase::RequestingClearance,
            progress: Progress::default(),
        }
    }

    /// Run to a terminal outcome, optionally bounded by an overall deadline.
    #[instrument(skip_all, fields(agent = %self.spec.agent, task_id = %self.spec.task_id))]
    pub async fn run(mut self, deadline: Option<Instant>) -> TaskReport {
        let started = Instant::now();
        self.emit(FleetEvent::TaskStarted {
            agent: self.spec.agent.clone(),
            task_id: self.spec.task_id.clone(),
            target: self.spec.target,
        });
        info!(target_cell = %self.spec.target, "task started");

        let driven = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.drive()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(ticks = self.progress.ticks, "run deadline reached");
                    Err(self.time_out())
                }
            },
            None => self.drive().await,
        };

        let outcome = match driven {
            Ok(outcome) => outcome,
            Err(FleetError::CriticalRecoveryFailure { attempts, .. }) => {
                TaskOutcome::CriticalFailure {
                    recoveries: attempts,
                }
            }
            Err(FleetError::Timeout { ticks, .. }) => TaskOutcome::Timeout { ticks },
            Err(err) => {
                warn!(error = %err, "task aborted");
                self.ctx
                    .coordinator
                    .abandon(&self.spec.agent, self.spec.target);
                self.ctx.arbiter.release(&self.spec.agent);
                TaskOutcome::Aborted {
                    error: err.to_string(),
                }
            }
        };

        self.emit(FleetEvent::TaskCompleted {
            agent: self.spec.agent.clone(),
            task_id: self.spec.task_id.clone(),
            success: outcome.is_success(),
            outcome: outcome.label().to_string(),
        });
        let report = TaskReport {
            spec: self.spec,
            outcome,
            phase: self.phase,
            clearance_attempts: self.progress.clearance_attempts,
            ticks: self.progress.ticks,
            stuck_events: self.progress.stuck_events,
            recoveries: self.progress.recoveries,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        info!(outcome = report.outcome.label(), ticks = report.ticks, "task finished");
        report
    }

    async fn drive(&mut self) -> Result<TaskOutcome, FleetError> {
        if let Some(denied) = self.acquire_clearance().await? {
            return Ok(denied);
        }
        self.ctx.coordinator.activate(
            &self.spec.agent,
            &self.spec.task_id,
            self.spec.target,
        )?;
        self.navigate().await
    }

    /// `Ok(None)` once granted; `Ok(Some(outcome))` when attempts run out.
    async fn acquire_clearance(&mut self) -> Result<Option<TaskOutcome>, FleetError> {
        let cfg = &self.ctx.config;
        let (agent, target) = (self.spec.agent.clone(), self.spec.target);
        loop {
            let attempt = self.progress.clearance_attempts;
            self.progress.clearance_attempts += 1;

            let mut verdict = self.ctx.arbiter.request_clearance(&agent, target)?;
            if verdict.is_granted() && self.ctx.decisions.vetoes_clearance(&agent, target).await {
                self.ctx.arbiter.release(&agent);
                verdict = Clearance::Denied(DenialReason::Vetoed);
            }

            let reason = match verdict {
                Clearance::Granted => {
                    self.emit(FleetEvent::ClearanceGranted {
                        agent: agent.clone(),
                        target,
                        attempt,
                    });
                    return Ok(None);
                }
                Clearance::Denied(reason) => reason,
            };
            self.emit(FleetEvent::ClearanceDenied {
                agent: agent.clone(),
                target,
                reason,
                attempt,
            });

            if self.progress.clearance_attempts >= cfg.clearance_attempts {
                warn!(attempts = self.progress.clearance_attempts, %reason, "clearance attempts exhausted");
                self.ctx.coordinator.abandon(&agent, target);
                self.phase = LoopPhase::Finished;
                return Ok(Some(TaskOutcome::ClearanceDenied {
                    reason,
                    attempts: self.progress.clearance_attempts,
                }));
            }
            let delay = cfg.backoff(attempt);
            debug!(attempt, %reason, delay_ms = delay.as_millis() as u64, "clearance denied; backing off");
            tokio::time::sleep(delay).await;
        }
    }

    async fn navigate(&mut self) -> Result<TaskOutcome, FleetError> {
        let (agent, target) = (self.spec.agent.clone(), self.spec.target);
        self.phase = LoopPhase::Navigating;
        self.issue_navigation().await?;

        let mut idle_streak = 0u32;
        loop {
            if self.progress.ticks >= self.ctx.config.max_ticks {
                warn!(ticks = self.progress.ticks, "tick budget exhausted");
                return Err(self.time_out());
            }

            self.ctx.backend.advance(&agent).await?;
            self.progress.ticks += 1;
            let state = self.ctx.backend.status(&agent).await?;

            match state.status {
                AgentStatus::Idle if state.pose == target => return self.complete(),
                AgentStatus::Idle => {
                    idle_streak += 1;
                    if idle_streak > self.ctx.config.idle_debounce {
                        debug!(pose = %state.pose, "idle away from target; re-issuing navigation");
                        self.issue_navigation().await?;
                        idle_streak = 0;
                    }
                }
                AgentStatus::Stuck => {
                    idle_streak = 0;
                    self.progress.stuck_events += 1;
                    let attempt = self.progress.stuck_events;
                    self.emit(FleetEvent::StuckDetected {
                        agent: agent.clone(),
                        location: state.pose,
                        attempt,
                    });
                    if attempt >= self.ctx.config.critical_recovery_threshold {
                        return Err(self.critical_failure());
                    }
                    self.recover(state.pose).await?;
                    self.issue_navigation().await?;
                    self.phase = LoopPhase::Navigating;
                }
                AgentStatus::Navigating | AgentStatus::Recovering => idle_streak = 0,
            }

            tokio::time::sleep(self.ctx.config.tick_interval()).await;
        }
    }

    async fn issue_navigation(&mut self) -> Result<(), FleetError> {
        let agent = &self.spec.agent;
        let pose = self.ctx.backend.status(agent).await?.pose;
        let commanded = self
            .ctx
            .decisions
            .navigation_target(agent, pose, self.spec.target)
            .await;
        self.ctx.backend.move_to(agent, commanded).await
    }

    async fn recover(&mut self, location: Pos) -> Result<(), FleetError> {
        self.phase = LoopPhase::Recovering;
        let agent = self.spec.agent.clone();
        self.ctx.backend.begin_recovery(&agent).await?;

        let history = self.ctx.store.query(&agent, location);
        let recommendation = recommend(&history, location, self.spec.target, &mut self.rng);
        debug!(
            %location,
            advised = %recommendation.strategy,
            source = ?recommendation.source,
            forbidden = ?recommendation.forbidden,
            "recovery advised"
        );
        let request = ManeuverRequest {
            agent: agent.clone(),
            location,
            target: self.spec.target,
            recommendation,
            history,
        };
        let (strategy, chosen_by) = self.ctx.decisions.maneuver(&request).await;

        let new_pose = self.ctx.backend.recover(&agent, strategy.as_str()).await?;
        self.progress.recoveries.push(RecoveryStep {
            location,
            strategy,
            chosen_by,
            new_pose,
        });
        self.emit(FleetEvent::RecoveryAttempted {
            agent,
            location,
            strategy,
            source: request.recommendation.source,
            new_pose,
        });
        info!(%location, %strategy, %new_pose, "recovery maneuver applied");

        let settle = self.ctx.config.settle_delay();
        if settle > Duration::ZERO {
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    fn complete(&mut self) -> Result<TaskOutcome, FleetError> {
        self.phase = LoopPhase::Finished;
        self.commit_history(true);
        for step in &self.progress.recoveries {
            self.emit(FleetEvent::RecoverySucceeded {
                agent: self.spec.agent.clone(),
                location: step.location,
                strategy: step.strategy,
            });
        }
        self.ctx.coordinator.mark_complete(&self.spec.agent, true)?;
        Ok(TaskOutcome::Completed)
    }

    fn critical_failure(&mut self) -> FleetError {
        self.phase = LoopPhase::Finished;
        warn!(
            recoveries = self.progress.recoveries.len(),
            "critical recovery threshold reached"
        );
        self.commit_history(false);
        self.ctx
            .coordinator
            .abandon(&self.spec.agent, self.spec.target);
        FleetError::CriticalRecoveryFailure {
            agent: self.spec.agent.clone(),
            attempts: self.progress.stuck_events,
        }
    }

    /// Insufficient evidence: nothing is credited or penalized.
    fn time_out(&mut self) -> FleetError {
        self.phase = LoopPhase::Finished;
        self.ctx
            .coordinator
            .abandon(&self.spec.agent, self.spec.target);
        self.ctx.arbiter.release(&self.spec.agent);
        FleetError::Timeout {
            agent: self.spec.agent.clone(),
            ticks: self.progress.ticks,
        }
    }

    fn commit_history(&self, success: bool) {
        let mut persisted = true;
        for step in &self.progress.recoveries {
            let durability =
                self.ctx
                    .store
                    .record(&self.spec.agent, step.location, step.strategy, success);
            persisted &= durability == Durability::Durable;
        }
        if !persisted && self.ctx.store.path().is_some() {
            warn!(success, "recovery outcomes kept in memory only");
        }
    }

    fn emit(&self, event: FleetEvent) {
        self.ctx.events.emit(&event);
    }
}
