//! Boundary to the external decision layer.
//!
//! The decision layer is untrusted: it may be slow, silent or wrong. Every
//! query goes through [`BoundedDecisions`], which applies the configured
//! timeout and falls back to the deterministic arbiter/advisor answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::core::advisor::Recommendation;
use crate::core::strategy_parser::parse_strategy;
use crate::core::types::{Pos, RecoveryHistory, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearanceVerdict {
    Approve,
    Veto,
}

/// Context handed to the decision layer when an agent is stuck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManeuverRequest {
    pub agent: String,
    pub location: Pos,
    pub target: Pos,
    pub recommendation: Recommendation,
    pub history: RecoveryHistory,
}

/// Questions the engine asks the decision layer. `None` means "no opinion".
#[async_trait]
pub trait DecisionPort: Send + Sync {
    /// Review a clearance the arbiter is about to grant.
    async fn review_clearance(&self, _agent: &str, _target: Pos) -> Option<ClearanceVerdict> {
        None
    }

    /// Free text or an exact maneuver name.
    async fn choose_maneuver(&self, _request: &ManeuverRequest) -> Option<String> {
        None
    }

    /// Cell the decision layer would command the agent toward.
    async fn navigation_target(&self, _agent: &str, _pose: Pos, _target: Pos) -> Option<Pos> {
        None
    }
}

/// Never answers; the engine runs on its own defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicDecisions;

#[async_trait]
impl DecisionPort for DeterministicDecisions {}

/// Who picked the maneuver that was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManeuverSource {
    DecisionLayer,
    Advisor,
}

#[derive(Clone)]
pub struct BoundedDecisions {
    port: Arc<dyn DecisionPort>,
    timeout: Duration,
}

impl BoundedDecisions {
    pub fn new(port: Arc<dyn DecisionPort>, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    /// True only on an explicit, timely veto. The decision layer can
    /// withhold a grant but never create one.
    pub async fn vetoes_clearance(&self, agent: &str, target: Pos) -> bool {
        match tokio::time::timeout(self.timeout, self.port.review_clearance(agent, target)).await {
            Ok(Some(ClearanceVerdict::Veto)) => {
                debug!(agent, %target, "decision layer vetoed clearance");
                true
            }
            Ok(_) => false,
            Err(_) => {
                warn!(agent, %target, "clearance review timed out; keeping arbiter verdict");
                false
            }
        }
    }

    /// Parsed decision-layer answer, else the advisor's recommendation.
    pub async fn maneuver(&self, request: &ManeuverRequest) -> (Strategy, ManeuverSource) {
        let fallback = request.recommendation.strategy;
        let answer =
            match tokio::time::timeout(self.timeout, self.port.choose_maneuver(request)).await {
                Ok(answer) => answer,
                Err(_) => {
                    warn!(agent = %request.agent, "maneuver query timed out; using advisor");
                    None
                }
            };
        let Some(text) = answer else {
            return (fallback, ManeuverSource::Advisor);
        };
        match parse_strategy(&text) {
            Some(strategy) => {
                if strategy != fallback {
                    debug!(
                        agent = %request.agent,
                        chosen = %strategy,
                        advised = %fallback,
                        "decision layer overrode advisor"
                    );
                }
                (strategy, ManeuverSource::DecisionLayer)
            }
            None => {
                warn!(agent = %request.agent, answer = %text, "unparseable maneuver answer; using advisor");
                (fallback, ManeuverSource::Advisor)
            }
        }
    }

    /// The cleared target always wins; disagreement is only logged.
    pub async fn navigation_target(&self, agent: &str, pose: Pos, cleared: Pos) -> Pos {
        match tokio::time::timeout(self.timeout, self.port.navigation_target(agent, pose, cleared))
            .await
        {
            Ok(Some(commanded)) if commanded != cleared => {
                warn!(agent, %commanded, %cleared, "decision layer commanded an uncleared cell; ignoring");
            }
            Ok(_) => {}
            Err(_) => debug!(agent, "navigation query timed out"),
        }
        cleared
    }
}
