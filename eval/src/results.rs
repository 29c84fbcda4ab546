//! Result capture and persistence.
//!
//! Each trial gets `eval/results/<case>/<trial>/` holding `events.jsonl`
//! (written live by the fleet) and `meta.json` (written here).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use fleet::core::types::{Pos, Strategy};
use fleet::fleet::FleetReport;

use crate::outcome::Outcome;

/// Input for capturing results from a completed trial.
#[derive(Debug)]
pub struct CaptureInput<'a> {
    pub case_id: &'a str,
    pub case_path: &'a Path,
    pub trial_id: &'a str,
    pub seed: u64,
    pub report: &'a FleetReport,
    pub outcome: Outcome,
    /// Experiences in the shared store before the trial started.
    pub history_before: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub repo_root: &'a Path,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub task_id: String,
    pub agent: String,
    pub target: Pos,
    pub outcome: String,
    pub ticks: u32,
    pub stuck_events: u32,
    pub strategies: Vec<Strategy>,
    pub reallocated_from: Option<String>,
}

/// Metadata for a trial, persisted to `meta.json`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrialMeta {
    pub case_id: String,
    pub trial_id: String,
    /// SHA-256 hash of the case file for reproducibility tracking.
    pub case_hash: String,
    /// Git SHA of the fleet repo at time of run.
    pub fleet_git_sha: Option<String>,
    pub seed: u64,
    pub outcome: Outcome,
    pub start_time: String,
    pub end_time: String,
    pub duration_secs: f64,
    pub tasks: Vec<TaskSummary>,
    pub tasks_completed: usize,
    pub reallocations: usize,
    /// Maneuvers applied across all tasks.
    pub recoveries: u32,
    pub strategy_usage: BTreeMap<Strategy, u32>,
    pub history_before: usize,
    /// Non-fatal errors encountered during capture.
    pub errors: Vec<String>,
}

impl TrialMeta {
    /// Fraction of tasks that completed in this trial.
    pub fn completion_rate(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        self.tasks_completed as f64 / self.tasks.len() as f64
    }
}

/// Write `meta.json` for a finished trial. Returns the trial directory.
#[instrument(skip_all, fields(case_id = %input.case_id, trial_id = %input.trial_id))]
pub fn capture_results(base_dir: &Path, input: &CaptureInput<'_>) -> Result<PathBuf> {
    let trial_dir = trial_dir(base_dir, input.case_id, input.trial_id);
    fs::create_dir_all(&trial_dir)
        .with_context(|| format!("create results dir {}", trial_dir.display()))?;

    let mut errors = Vec::new();

    let case_hash = match file_sha256(input.case_path) {
        Ok(hash) => hash,
        Err(err) => {
            errors.push(format!("case hash: {err}"));
            String::new()
        }
    };

    let fleet_git_sha = match git_rev_parse(input.repo_root) {
        Ok(sha) => Some(sha),
        Err(err) => {
            errors.push(format!("fleet git sha: {err}"));
            None
        }
    };

    if !trial_dir.join("events.jsonl").exists() {
        errors.push("events.jsonl: missing".to_string());
    }
    for note in input
        .report
        .unreallocated
        .iter()
        .chain(&input.report.crashed)
    {
        errors.push(note.clone());
    }
    if !errors.is_empty() {
        warn!(errors = ?errors, "trial capture had errors");
    }

    let tasks: Vec<TaskSummary> = input
        .report
        .reports
        .iter()
        .map(|report| TaskSummary {
            task_id: report.spec.task_id.clone(),
            agent: report.spec.agent.clone(),
            target: report.spec.target,
            outcome: report.outcome.label().to_string(),
            ticks: report.ticks,
            stuck_events: report.stuck_events,
            strategies: report.recoveries.iter().map(|step| step.strategy).collect(),
            reallocated_from: report.spec.reallocated_from.clone(),
        })
        .collect();
    let mut strategy_usage: BTreeMap<Strategy, u32> = BTreeMap::new();
    for strategy in tasks.iter().flat_map(|task| &task.strategies) {
        *strategy_usage.entry(*strategy).or_default() += 1;
    }

    let duration = input.finished_at - input.started_at;
    let meta = TrialMeta {
        case_id: input.case_id.to_string(),
        trial_id: input.trial_id.to_string(),
        case_hash,
        fleet_git_sha,
        seed: input.seed,
        outcome: input.outcome,
        start_time: input.started_at.to_rfc3339(),
        end_time: input.finished_at.to_rfc3339(),
        duration_secs: duration.num_milliseconds() as f64 / 1000.0,
        tasks_completed: input.report.completed_count(),
        reallocations: input.report.reallocations.len(),
        recoveries: strategy_usage.values().sum(),
        strategy_usage,
        tasks,
        history_before: input.history_before,
        errors,
    };

    write_meta(&trial_dir.join("meta.json"), &meta)?;
    debug!(trial_dir = %trial_dir.display(), "results captured");
    Ok(trial_dir)
}

pub fn trial_dir(base_dir: &Path, case_id: &str, trial_id: &str) -> PathBuf {
    base_dir.join(case_id).join(trial_id)
}

pub fn read_meta(path: &Path) -> Result<TrialMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_meta(path: &Path, meta: &TrialMeta) -> Result<()> {
    let contents = serde_json::to_string_pretty(meta).context("serialize meta")?;
    fs::write(path, format!("{contents}\n"))
        .with_context(|| format!("write meta {}", path.display()))?;
    Ok(())
}

fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(contents);
    let digest = hasher.finalize();
    Ok(hex::encode(digest))
}

fn git_rev_parse(repo_root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .context("git rev-parse")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git rev-parse failed: {}", stderr.trim()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use fleet::execution::{LoopPhase, RecoveryStep, TaskOutcome, TaskReport, TaskSpec};
    use fleet::io::decision::ManeuverSource;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn trial_dir_is_stable() {
        let base = Path::new("/tmp/results");
        let dir = trial_dir(base, "case", "trial-1");
        assert_eq!(dir, PathBuf::from("/tmp/results/case/trial-1"));
    }

    #[test]
    fn writes_meta_with_hash_and_strategy_usage() {
        let temp = tempdir().expect("tempdir");
        let results = temp.path().join("results");
        let case_path = temp.path().join("case.toml");
        fs::write(&case_path, "[case]\nid='case'\n").expect("case");
        let dir = trial_dir(&results, "case", "trial-1");
        fs::create_dir_all(&dir).expect("dir");
        fs::write(dir.join("events.jsonl"), "").expect("events");

        let step = RecoveryStep {
            location: Pos::new(6, 6),
            strategy: Strategy::ReverseOnly,
            chosen_by: ManeuverSource::Advisor,
            new_pose: Pos::new(6, 8),
        };
        let report = FleetReport {
            reports: vec![TaskReport {
                spec: TaskSpec::new("robot_1", Pos::new(6, 8)),
                outcome: TaskOutcome::Completed,
                phase: LoopPhase::Finished,
                clearance_attempts: 1,
                ticks: 6,
                stuck_events: 1,
                recoveries: vec![step],
                duration_ms: 40,
            }],
            ..FleetReport::default()
        };
        let now = Utc::now();
        let input = CaptureInput {
            case_id: "case",
            case_path: &case_path,
            trial_id: "trial-1",
            seed: 9,
            report: &report,
            outcome: Outcome::Success,
            history_before: 0,
            started_at: now,
            finished_at: now,
            repo_root: temp.path(),
        };

        let out = capture_results(&results, &input).expect("capture");
        let meta = read_meta(&out.join("meta.json")).expect("meta");
        assert_eq!(meta.case_hash.len(), 64);
        assert_eq!(meta.recoveries, 1);
        assert_eq!(meta.strategy_usage[&Strategy::ReverseOnly], 1);
        assert_eq!(meta.tasks[0].strategies, vec![Strategy::ReverseOnly]);
        assert!((meta.completion_rate() - 1.0).abs() < f64::EPSILON);
    }
}
