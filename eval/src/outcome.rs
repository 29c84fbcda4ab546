use serde::{Deserialize, Serialize};

use fleet::execution::TaskOutcome;
use fleet::fleet::FleetReport;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Fail,
    Stuck,
    Timeout,
}

/// Success only when every task (or its retry) completed. Otherwise a
/// timeout outranks a critical failure, which outranks any other failure.
pub fn classify_outcome(report: &FleetReport) -> Outcome {
    if report.all_completed() {
        return Outcome::Success;
    }
    let any = |pred: fn(&TaskOutcome) -> bool| report.reports.iter().any(|r| pred(&r.outcome));
    if any(|o| matches!(o, TaskOutcome::Timeout { .. })) {
        Outcome::Timeout
    } else if any(|o| matches!(o, TaskOutcome::CriticalFailure { .. })) {
        Outcome::Stuck
    } else {
        Outcome::Fail
    }
}

#[cfg(test)]
mod tests {
    use fleet::core::types::Pos;
    use fleet::execution::{LoopPhase, TaskReport, TaskSpec};

    use super::*;

    fn report(outcomes: &[TaskOutcome]) -> FleetReport {
        let reports = outcomes
            .iter()
            .enumerate()
            .map(|(n, outcome)| TaskReport {
                spec: TaskSpec::new(format!("robot_{n}"), Pos::new(1, 1)),
                outcome: outcome.clone(),
                phase: LoopPhase::Finished,
                clearance_attempts: 1,
                ticks: 3,
                stuck_events: 0,
                recoveries: Vec::new(),
                duration_ms: 10,
            })
            .collect();
        FleetReport {
            reports,
            ..FleetReport::default()
        }
    }

    #[test]
    fn success_when_all_complete() {
        let outcome = classify_outcome(&report(&[TaskOutcome::Completed, TaskOutcome::Completed]));
        assert_eq!(outcome, Outcome::Success);
    }

    #[test]
    fn critical_failure_is_stuck() {
        let outcome = classify_outcome(&report(&[
            TaskOutcome::Completed,
            TaskOutcome::CriticalFailure { recoveries: 3 },
        ]));
        assert_eq!(outcome, Outcome::Stuck);
    }

    #[test]
    fn timeout_outranks_stuck() {
        let outcome = classify_outcome(&report(&[
            TaskOutcome::CriticalFailure { recoveries: 3 },
            TaskOutcome::Timeout { ticks: 200 },
        ]));
        assert_eq!(outcome, Outcome::Timeout);
    }

    #[test]
    fn other_failures_are_fail() {
        let outcome = classify_outcome(&report(&[TaskOutcome::Aborted {
            error: "boom".to_string(),
        }]));
        assert_eq!(outcome, Outcome::Fail);
    }
}
