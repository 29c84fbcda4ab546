//! Fleet configuration stored under `.fleet/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::grid::WorldParams;
use crate::core::types::{HazardZone, Pos};

/// Fleet configuration (TOML).
///
/// Edited by humans; every field has a default so partial files are valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FleetConfig {
    pub world: WorldConfig,
    pub execution: ExecutionConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorldConfig {
    /// Cells run from `0` to `grid_size` inclusive.
    pub grid_size: i32,
    pub stuck_threshold: u32,
    pub recovery_cooldown: u32,
    pub hazard: HazardZone,
    /// Agent id to start cell.
    pub agents: BTreeMap<String, Pos>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            grid_size: 10,
            stuck_threshold: 2,
            recovery_cooldown: 10,
            hazard: HazardZone::default(),
            agents: BTreeMap::from([
                ("robot_1".to_string(), Pos::new(0, 0)),
                ("robot_2".to_string(), Pos::new(0, 1)),
                ("robot_3".to_string(), Pos::new(1, 0)),
            ]),
        }
    }
}

impl WorldConfig {
    pub fn params(&self) -> WorldParams {
        WorldParams {
            grid_size: self.grid_size,
            hazard: self.hazard,
            stuck_threshold: self.stuck_threshold,
            recovery_cooldown: self.recovery_cooldown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Tick budget per task before it times out.
    pub max_ticks: u32,
    /// Clearance requests before a task is abandoned.
    pub clearance_attempts: u32,
    /// STUCK episodes per task before it fails and is reallocated.
    pub critical_recovery_threshold: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub tick_interval_ms: u64,
    /// Pause after a maneuver before navigation resumes.
    pub settle_delay_ms: u64,
    /// Consecutive idle-away-from-target observations before re-issuing navigation.
    pub idle_debounce: u32,
    pub decision_timeout_ms: u64,
    /// Delay between consecutive loop starts in a fleet run.
    pub start_stagger_ms: u64,
    /// Overall deadline for a fleet run.
    pub run_deadline_secs: Option<u64>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_ticks: 200,
            clearance_attempts: 10,
            critical_recovery_threshold: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 15_000,
            tick_interval_ms: 100,
            settle_delay_ms: 500,
            idle_debounce: 3,
            decision_timeout_ms: 5_000,
            start_stagger_ms: 0,
            run_deadline_secs: None,
        }
    }
}

impl ExecutionConfig {
    /// Delay before clearance retry number `attempt` (0-based): `min(cap, base * 2^attempt)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self.backoff_base_ms.saturating_mul(factor);
        Duration::from_millis(ms.min(self.backoff_cap_ms))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }

    pub fn start_stagger(&self) -> Duration {
        Duration::from_millis(self.start_stagger_ms)
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        self.run_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Recovery history file, relative to the working directory.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".fleet/recovery_history.json"),
        }
    }
}

impl FleetConfig {
    pub fn validate(&self) -> Result<()> {
        let world = &self.world;
        if world.grid_size <= 0 {
            return Err(anyhow!("world.grid_size must be > 0"));
        }
        if world.stuck_threshold == 0 {
            return Err(anyhow!("world.stuck_threshold must be > 0"));
        }
        let zone = world.hazard;
        if zone.x_min > zone.x_max || zone.y_min > zone.y_max {
            return Err(anyhow!("world.hazard bounds must satisfy min <= max"));
        }
        if world.agents.is_empty() {
            return Err(anyhow!("world.agents must name at least one agent"));
        }
        for (id, pos) in &world.agents {
            if id.trim().is_empty() {
                return Err(anyhow!("world.agents ids must be non-empty"));
            }
            let in_grid = (0..=world.grid_size).contains(&pos.x)
                && (0..=world.grid_size).contains(&pos.y);
            if !in_grid {
                return Err(anyhow!("world.agents.{id} start {pos} is outside the grid"));
            }
        }

        let exec = &self.execution;
        if exec.max_ticks == 0 {
            return Err(anyhow!("execution.max_ticks must be > 0"));
        }
        if exec.clearance_attempts == 0 {
            return Err(anyhow!("execution.clearance_attempts must be > 0"));
        }
        if exec.critical_recovery_threshold == 0 {
            return Err(anyhow!("execution.critical_recovery_threshold must be > 0"));
        }
        if exec.backoff_cap_ms < exec.backoff_base_ms {
            return Err(anyhow!("execution.backoff_cap_ms must be >= backoff_base_ms"));
        }
        if exec.decision_timeout_ms == 0 {
            return Err(anyhow!("execution.decision_timeout_ms must be > 0"));
        }
        if exec.run_deadline_secs == Some(0) {
            return Err(anyhow!("execution.run_deadline_secs must be > 0 when set"));
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(anyhow!("store.path must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FleetConfig::default()`.
pub fn load_config(path: &Path) -> Result<FleetConfig> {
    if !path.exists() {
        let cfg = FleetConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FleetConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FleetConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
