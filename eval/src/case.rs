//! Case file parsing and validation.
//!
//! Cases are TOML files defining start cells, tasks and config overrides for
//! a scenario that forces hazard crossings. See `eval/cases/` for examples.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use fleet::core::types::Pos;

/// A parsed case file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseFile {
    pub case: CaseMeta,
    #[serde(default)]
    pub config: CaseConfig,
    /// Agent id to start cell; these are the only agents in the trial.
    pub start_positions: BTreeMap<String, Pos>,
    /// Agent id to target cell.
    pub tasks: BTreeMap<String, Pos>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CaseMeta {
    /// Unique identifier (slug format: `[a-z0-9_-]+`).
    pub id: String,
    pub description: String,
}

/// Fleet configuration overrides for the case.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CaseConfig {
    pub max_ticks: Option<u32>,
    pub critical_recovery_threshold: Option<u32>,
    pub stuck_threshold: Option<u32>,
    pub recovery_cooldown: Option<u32>,
    pub start_stagger_ms: Option<u64>,
}

impl CaseFile {
    /// Load and validate a case file from the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read case {}", path.display()))?;
        let case: CaseFile =
            toml::from_str(&contents).with_context(|| format!("parse case {}", path.display()))?;
        case.validate()
            .with_context(|| format!("validate case {}", path.display()))?;
        Ok(case)
    }

    #[cfg(test)]
    pub fn parse_str(contents: &str) -> Result<Self> {
        let case: CaseFile = toml::from_str(contents).context("parse case")?;
        case.validate()?;
        Ok(case)
    }

    fn validate(&self) -> Result<()> {
        validate_case_id(&self.case.id)?;
        if self.case.description.trim().is_empty() {
            bail!("case.description must be non-empty");
        }
        for (label, value) in [
            ("max_ticks", self.config.max_ticks),
            ("critical_recovery_threshold", self.config.critical_recovery_threshold),
            ("stuck_threshold", self.config.stuck_threshold),
        ] {
            if value == Some(0) {
                bail!("config.{label} must be > 0");
            }
        }
        if self.start_positions.is_empty() {
            bail!("start_positions must name at least one agent");
        }
        if self.tasks.is_empty() {
            bail!("tasks must be non-empty");
        }
        for agent in self.tasks.keys() {
            if !self.start_positions.contains_key(agent) {
                bail!("tasks.{agent} has no start position");
            }
        }
        Ok(())
    }
}

/// Discover and load all case files from a directory.
///
/// Returns cases sorted by id. Errors if duplicate ids are found.
pub fn discover_cases(dir: &Path) -> Result<Vec<CaseFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cases = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read cases dir {}", dir.display()))? {
        let entry = entry.context("read case entry")?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        cases.push(CaseFile::load(&path)?);
    }
    cases.sort_by(|left, right| left.case.id.cmp(&right.case.id));
    for pair in cases.windows(2) {
        if pair[0].case.id == pair[1].case.id {
            return Err(anyhow!("duplicate case.id {}", pair[0].case.id));
        }
    }
    Ok(cases)
}

fn validate_case_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        bail!("case.id must be non-empty");
    }
    if id.contains('/') || id.contains('\\') {
        bail!("case.id must not contain path separators");
    }
    if id.contains("..") {
        bail!("case.id must not contain '..'");
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        bail!("case.id must use [a-z0-9_-] only");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_case() {
        let input = r#"
[case]
id = "north-crossing"
description = "three agents cross the hazard heading north"

[config]
max_ticks = 120
critical_recovery_threshold = 4

[start_positions]
robot_1 = [7, 3]
robot_2 = [6, 2]

[tasks]
robot_1 = [7, 9]
robot_2 = [6, 9]
"#;
        let case = CaseFile::parse_str(input).expect("case parses");
        assert_eq!(case.case.id, "north-crossing");
        assert_eq!(case.config.max_ticks, Some(120));
        assert_eq!(case.tasks["robot_2"], Pos::new(6, 9));
    }

    #[test]
    fn rejects_invalid_id() {
        let input = r#"
[case]
id = "bad/id"
description = "x"

[start_positions]
robot_1 = [0, 0]

[tasks]
robot_1 = [1, 1]
"#;
        let err = CaseFile::parse_str(input).expect_err("invalid id");
        assert!(err.to_string().contains("case.id"));
    }

    #[test]
    fn rejects_tasks_for_unplaced_agents() {
        let input = r#"
[case]
id = "orphan"
description = "x"

[start_positions]
robot_1 = [0, 0]

[tasks]
robot_9 = [1, 1]
"#;
        let err = CaseFile::parse_str(input).expect_err("orphan task");
        assert!(err.to_string().contains("robot_9"));
    }

    #[test]
    fn rejects_unknown_overrides() {
        let input = r#"
[case]
id = "typo"
description = "x"

[config]
max_tick = 5

[start_positions]
robot_1 = [0, 0]

[tasks]
robot_1 = [1, 1]
"#;
        assert!(CaseFile::parse_str(input).is_err());
    }

    #[test]
    fn shipped_cases_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("cases");
        let ids: Vec<String> = discover_cases(&dir)
            .expect("cases load")
            .into_iter()
            .map(|case| case.case.id)
            .collect();
        assert_eq!(ids, vec!["center", "diagonal", "east", "mixed", "north"]);
    }
}
