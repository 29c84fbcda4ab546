//! Lifecycle telemetry: one-way, best-effort event notifications.
//!
//! # Separation of Concerns
//!
//! - **Tracing (`logging`)**: dev diagnostics via `RUST_LOG`.
//! - **Events (this module)**: product lifecycle records for observers such as
//!   the eval harness. A failing sink never affects task execution.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::advisor::AdviceSource;
use crate::core::types::{Pos, Strategy};
use crate::error::DenialReason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FleetEvent {
    TaskStarted {
        agent: String,
        task_id: String,
        target: Pos,
    },
    ClearanceGranted {
        agent: String,
        target: Pos,
        attempt: u32,
    },
    ClearanceDenied {
        agent: String,
        target: Pos,
        reason: DenialReason,
        attempt: u32,
    },
    StuckDetected {
        agent: String,
        location: Pos,
        attempt: u32,
    },
    RecoveryAttempted {
        agent: String,
        location: Pos,
        strategy: Strategy,
        source: AdviceSource,
        new_pose: Pos,
    },
    RecoverySucceeded {
        agent: String,
        location: Pos,
        strategy: Strategy,
    },
    TaskCompleted {
        agent: String,
        task_id: String,
        success: bool,
        outcome: String,
    },
    TaskReallocated {
        from: String,
        to: String,
        task_id: String,
        target: Pos,
    },
}

impl FleetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FleetEvent::TaskStarted { .. } => "task_started",
            FleetEvent::ClearanceGranted { .. } => "clearance_granted",
            FleetEvent::ClearanceDenied { .. } => "clearance_denied",
            FleetEvent::StuckDetected { .. } => "stuck_detected",
            FleetEvent::RecoveryAttempted { .. } => "recovery_attempted",
            FleetEvent::RecoverySucceeded { .. } => "recovery_succeeded",
            FleetEvent::TaskCompleted { .. } => "task_completed",
            FleetEvent::TaskReallocated { .. } => "task_reallocated",
        }
    }
}

/// Receiver of lifecycle events. Implementations must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &FleetEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &FleetEvent) {}
}

/// Re-emits events as `info!` records under the `fleet::events` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &FleetEvent) {
        match serde_json::to_string(event) {
            Ok(json) => info!(target: "fleet::events", event = event.name(), %json),
            Err(err) => warn!(event = event.name(), error = %err, "event serialization failed"),
        }
    }
}

#[derive(Serialize)]
struct JsonlRecord<'a> {
    ts_ms: u64,
    #[serde(flatten)]
    event: &'a FleetEvent,
}

/// Appends one JSON object per line. Write failures are logged and dropped.
#[derive(Debug)]
pub struct JsonlSink {
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open event log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &FleetEvent) {
        let ts_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        let line = match serde_json::to_string(&JsonlRecord { ts_ms, event }) {
            Ok(line) => line,
            Err(err) => {
                warn!(event = event.name(), error = %err, "event serialization failed");
                return;
            }
        };
        let mut file = self.file.lock();
        if let Err(err) = writeln!(file, "{line}") {
            warn!(event = event.name(), error = %err, "event log write failed");
        }
    }
}

/// Keeps events in memory, for tests and in-process harnesses.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FleetEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<FleetEvent> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &FleetEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanOut {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

impl EventSink for FanOut {
    fn emit(&self, event: &FleetEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> FleetEvent {
        FleetEvent::TaskStarted {
            agent: "robot_1".to_string(),
            task_id: "task_robot_1_7_9".to_string(),
            target: Pos::new(7, 9),
        }
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(started()).expect("serialize");
        assert_eq!(json["event"], "task_started");
        assert_eq!(json["target"], serde_json::json!([7, 9]));
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("logs/events.jsonl");
        let sink = JsonlSink::create(&path).expect("create");
        sink.emit(&started());
        sink.emit(&FleetEvent::ClearanceDenied {
            agent: "robot_2".to_string(),
            target: Pos::new(7, 9),
            reason: DenialReason::TargetAlreadyClaimed,
            attempt: 0,
        });

        let contents = fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "task_started");
        assert!(lines[0]["ts_ms"].is_u64());
        assert_eq!(lines[1]["reason"], "target_already_claimed");
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let first = Arc::new(RecordingSink::default());
        let second = Arc::new(RecordingSink::default());
        let fan = FanOut::new(vec![
            first.clone() as Arc<dyn EventSink>,
            second.clone() as Arc<dyn EventSink>,
            Arc::new(NullSink) as Arc<dyn EventSink>,
        ]);
        fan.emit(&started());
        assert_eq!(first.events(), vec![started()]);
        assert_eq!(second.events(), vec![started()]);
    }
}
