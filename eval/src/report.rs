use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use fleet::core::types::Strategy;

use crate::outcome::Outcome;
use crate::results::{TrialMeta, read_meta};

#[derive(Debug, Default)]
pub struct ReportSummary {
    pub trials: usize,
    pub success: usize,
    pub fail: usize,
    pub stuck: usize,
    pub timeout: usize,
    pub avg_duration_secs: Option<f64>,
    pub total_recoveries: u32,
    pub strategy_usage: BTreeMap<Strategy, u32>,
    /// Per-trial task completion rate, oldest trial first.
    pub learning_curve: Vec<LearningPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearningPoint {
    pub trial_id: String,
    pub completion_rate: f64,
    pub recoveries: u32,
    pub history_before: usize,
}

pub fn load_trial_dirs(case_results_dir: &Path) -> Result<Vec<PathBuf>> {
    if !case_results_dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(case_results_dir)
        .with_context(|| format!("read {}", case_results_dir.display()))?
    {
        let entry = entry.context("read entry")?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn aggregate(case_results_dir: &Path) -> Result<(ReportSummary, Vec<String>)> {
    let mut summary = ReportSummary::default();
    let mut warnings = Vec::new();

    for trial_dir in load_trial_dirs(case_results_dir)? {
        let meta = match read_meta(&trial_dir.join("meta.json")) {
            Ok(meta) => meta,
            Err(err) => {
                warnings.push(format!(
                    "skip {}: meta.json invalid ({err:#})",
                    trial_dir.display()
                ));
                continue;
            }
        };
        add_trial(&mut summary, &meta);
    }

    Ok((summary, warnings))
}

fn add_trial(summary: &mut ReportSummary, meta: &TrialMeta) {
    summary.trials += 1;
    match meta.outcome {
        Outcome::Success => summary.success += 1,
        Outcome::Fail => summary.fail += 1,
        Outcome::Stuck => summary.stuck += 1,
        Outcome::Timeout => summary.timeout += 1,
    }

    summary.avg_duration_secs = Some(match summary.avg_duration_secs {
        None => meta.duration_secs,
        Some(avg) => {
            let total = avg * (summary.trials as f64 - 1.0) + meta.duration_secs;
            total / summary.trials as f64
        }
    });

    summary.total_recoveries += meta.recoveries;
    for (strategy, count) in &meta.strategy_usage {
        *summary.strategy_usage.entry(*strategy).or_default() += count;
    }
    summary.learning_curve.push(LearningPoint {
        trial_id: meta.trial_id.clone(),
        completion_rate: meta.completion_rate(),
        recoveries: meta.recoveries,
        history_before: meta.history_before,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::TaskSummary;
    use fleet::core::types::Pos;
    use tempfile::tempdir;

    fn write_meta(dir: &Path, outcome: Outcome, duration: f64, completed: usize, used: &[Strategy]) {
        fs::create_dir_all(dir).expect("trial dir");
        let tasks = (0..2)
            .map(|n| TaskSummary {
                task_id: format!("task_{n}"),
                agent: format!("robot_{n}"),
                target: Pos::new(n, 9),
                outcome: if n < completed as i32 { "completed" } else { "critical_failure" }
                    .to_string(),
                ticks: 12,
                stuck_events: 1,
                strategies: Vec::new(),
                reallocated_from: None,
            })
            .collect();
        let mut strategy_usage = BTreeMap::new();
        for strategy in used {
            *strategy_usage.entry(*strategy).or_default() += 1;
        }
        let meta = TrialMeta {
            case_id: "case".to_string(),
            trial_id: dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            case_hash: "hash".to_string(),
            fleet_git_sha: None,
            seed: 1,
            outcome,
            start_time: "now".to_string(),
            end_time: "later".to_string(),
            duration_secs: duration,
            tasks,
            tasks_completed: completed,
            reallocations: 0,
            recoveries: used.len() as u32,
            strategy_usage,
            history_before: 0,
            errors: Vec::new(),
        };
        let contents = serde_json::to_string_pretty(&meta).expect("meta json");
        fs::write(dir.join("meta.json"), format!("{contents}\n")).expect("write meta");
    }

    #[test]
    fn aggregates_trials_in_order() {
        let temp = tempdir().expect("tempdir");
        write_meta(
            &temp.path().join("trial-1"),
            Outcome::Stuck,
            5.0,
            1,
            &[Strategy::ReverseOnly, Strategy::ReverseAndTurnRight],
        );
        write_meta(
            &temp.path().join("trial-2"),
            Outcome::Success,
            15.0,
            2,
            &[Strategy::ReverseOnly],
        );

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert!(warnings.is_empty());
        assert_eq!(summary.trials, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.stuck, 1);
        assert_eq!(summary.avg_duration_secs, Some(10.0));
        assert_eq!(summary.total_recoveries, 3);
        assert_eq!(summary.strategy_usage[&Strategy::ReverseOnly], 2);

        let rates: Vec<f64> = summary
            .learning_curve
            .iter()
            .map(|point| point.completion_rate)
            .collect();
        assert_eq!(rates, vec![0.5, 1.0]);
    }

    #[test]
    fn skips_invalid_meta() {
        let temp = tempdir().expect("tempdir");
        let broken = temp.path().join("trial-0");
        fs::create_dir_all(&broken).expect("dir");
        fs::write(broken.join("meta.json"), "{").expect("write");

        let (summary, warnings) = aggregate(temp.path()).expect("aggregate");
        assert_eq!(summary.trials, 0);
        assert_eq!(warnings.len(), 1);
    }
}
