//! CLI command implementations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use fleet::io::recovery_store::Durability;

use crate::case::{CaseFile, discover_cases};
use crate::harness::Harness;
use crate::report::aggregate;
use crate::run::run_case;

/// Options for `eval run`.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub trials: u32,
    /// Start from an empty recovery history.
    pub fresh: bool,
    /// Base seed; trial `n` uses `seed + n - 1`.
    pub seed: Option<u64>,
}

/// List all available cases.
pub fn list_cases(repo_root: &Path) -> Result<()> {
    let cases_dir = repo_root.join("eval").join("cases");
    let cases = discover_cases(&cases_dir)?;
    for case in cases {
        println!("{}: {}", case.case.id, case.case.description);
    }
    Ok(())
}

/// Run a case by id, sharing one recovery history across its trials.
pub fn run_case_by_id(repo_root: &Path, case_id: &str, options: RunOptions) -> Result<()> {
    let cases_dir = repo_root.join("eval").join("cases");
    let case_path = cases_dir.join(format!("{case_id}.toml"));
    if !case_path.exists() {
        bail!("case {} not found at {}", case_id, case_path.display());
    }
    let case = CaseFile::load(&case_path).context("load case")?;
    debug!(case_id, trials = options.trials, "case loaded");

    let harness = Harness::new(&history_path(repo_root, case_id))?;
    if options.fresh {
        let cleared = harness.store().len();
        if harness.clear_history() == Durability::MemoryOnly {
            warn!(case_id, "cleared history could not be persisted");
        }
        debug!(case_id, cleared, "history cleared");
    }

    let base_seed = options.seed.unwrap_or_else(rand::random);
    info!(case_id, trials = options.trials, base_seed, "starting trials");
    for trial_num in 1..=options.trials {
        let seed = base_seed.wrapping_add(u64::from(trial_num) - 1);
        let trial = run_case(repo_root, &case_path, &case, &harness, trial_num, seed)
            .context("run trial")?;
        println!(
            "trial: case={} trial_id={} outcome={:?} tasks={}/{} history={} results={}",
            case_id,
            trial.trial_id,
            trial.outcome,
            trial.tasks_completed,
            trial.tasks,
            harness.store().len(),
            trial.results_dir.display()
        );
    }
    Ok(())
}

/// Show aggregated results for a case.
pub fn report_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let results_dir = repo_root.join("eval").join("results").join(case_id);
    let (summary, warnings) = aggregate(&results_dir)?;
    println!("report: case={} trials={}", case_id, summary.trials);
    println!(
        "report: success={} fail={} stuck={} timeout={}",
        summary.success, summary.fail, summary.stuck, summary.timeout
    );
    if let Some(avg) = summary.avg_duration_secs {
        println!("report: avg_duration_secs={:.2}", avg);
    }
    println!("report: recoveries={}", summary.total_recoveries);
    for (strategy, count) in &summary.strategy_usage {
        println!("report: strategy {} {}", strategy.as_str(), count);
    }
    for point in &summary.learning_curve {
        println!(
            "report: curve {} completion={:.2} recoveries={} history_before={}",
            point.trial_id, point.completion_rate, point.recoveries, point.history_before
        );
    }
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Remove trial results for a case. The recovery history goes with them.
pub fn clean_case(repo_root: &Path, case_id: &str) -> Result<()> {
    let case_results = repo_root.join("eval").join("results").join(case_id);
    if case_results.exists() {
        std::fs::remove_dir_all(&case_results)
            .with_context(|| format!("remove {}", case_results.display()))?;
    }
    println!("clean: case={} results={}", case_id, case_results.display());
    Ok(())
}

fn history_path(repo_root: &Path, case_id: &str) -> PathBuf {
    repo_root
        .join("eval")
        .join("results")
        .join(case_id)
        .join("recovery_history.json")
}
