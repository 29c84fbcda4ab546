//! Fleet configuration merging.
//!
//! Applies case-specific overrides and the fast trial pacing to the default
//! fleet configuration.

use anyhow::Result;
use fleet::io::config::FleetConfig;

use crate::case::CaseFile;

/// Trials run in real time; keep pacing short but nonzero so loops interleave.
pub const TRIAL_TICK_MS: u64 = 2;
pub const TRIAL_SETTLE_MS: u64 = 5;
pub const TRIAL_BACKOFF_BASE_MS: u64 = 20;
pub const TRIAL_BACKOFF_CAP_MS: u64 = 320;
pub const TRIAL_DEADLINE_SECS: u64 = 120;

/// Apply trial pacing and case overrides to the base fleet config.
pub fn apply_case_config(mut base: FleetConfig, case: &CaseFile) -> Result<FleetConfig> {
    let exec = &mut base.execution;
    exec.tick_interval_ms = TRIAL_TICK_MS;
    exec.settle_delay_ms = TRIAL_SETTLE_MS;
    exec.backoff_base_ms = TRIAL_BACKOFF_BASE_MS;
    exec.backoff_cap_ms = TRIAL_BACKOFF_CAP_MS;
    exec.run_deadline_secs = Some(TRIAL_DEADLINE_SECS);

    let overrides = &case.config;
    if let Some(max_ticks) = overrides.max_ticks {
        exec.max_ticks = max_ticks;
    }
    if let Some(threshold) = overrides.critical_recovery_threshold {
        exec.critical_recovery_threshold = threshold;
    }
    if let Some(stagger) = overrides.start_stagger_ms {
        exec.start_stagger_ms = stagger;
    }
    if let Some(threshold) = overrides.stuck_threshold {
        base.world.stuck_threshold = threshold;
    }
    if let Some(cooldown) = overrides.recovery_cooldown {
        base.world.recovery_cooldown = cooldown;
    }
    base.world.agents = case.start_positions.clone();
    base.validate()?;
    Ok(base)
}
