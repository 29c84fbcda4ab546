//! Trial orchestration.
//!
//! Coordinates config merging, fleet execution, and result capture.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument};

use fleet::io::config::FleetConfig;

use crate::case::CaseFile;
use crate::config::apply_case_config;
use crate::harness::Harness;
use crate::outcome::{Outcome, classify_outcome};
use crate::results::{CaptureInput, capture_results, trial_dir};

/// Result of running a single trial.
#[derive(Debug)]
pub struct TrialOutcome {
    pub trial_id: String,
    pub results_dir: PathBuf,
    pub outcome: Outcome,
    pub tasks_completed: usize,
    pub tasks: usize,
}

/// Run one trial end-to-end: config merge, fleet run, result capture.
#[instrument(skip_all, fields(case_id = %case.case.id, trial_num = trial_num, seed = seed))]
pub fn run_case(
    repo_root: &Path,
    case_path: &Path,
    case: &CaseFile,
    harness: &Harness,
    trial_num: u32,
    seed: u64,
) -> Result<TrialOutcome> {
    info!("trial started");

    let config = apply_case_config(FleetConfig::default(), case).context("merge case config")?;

    let results_base = repo_root.join("eval").join("results");
    let trial_id = format_trial_id(&Utc::now(), trial_num);
    let dir = trial_dir(&results_base, &case.case.id, &trial_id);
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;

    let history_before = harness.store().len();
    let started_at = Utc::now();
    let report = harness
        .run_trial(config, case, &dir.join("events.jsonl"), seed)
        .context("run trial")?;
    let finished_at = Utc::now();

    let outcome = classify_outcome(&report);
    debug!(
        completed = report.completed_count(),
        reallocations = report.reallocations.len(),
        "fleet run finished"
    );

    let capture_input = CaptureInput {
        case_id: &case.case.id,
        case_path,
        trial_id: &trial_id,
        seed,
        report: &report,
        outcome,
        history_before,
        started_at,
        finished_at,
        repo_root,
    };
    let results_dir = capture_results(&results_base, &capture_input).context("capture results")?;

    info!(outcome = ?outcome, results_dir = %results_dir.display(), "trial complete");

    Ok(TrialOutcome {
        trial_id,
        results_dir,
        outcome,
        tasks_completed: report.completed_count(),
        tasks: report.reports.len(),
    })
}

fn format_trial_id(now: &chrono::DateTime<Utc>, trial_num: u32) -> String {
    format!("trial-{}-{trial_num:03}", now.format("%Y%m%d_%H%M%S"))
}
