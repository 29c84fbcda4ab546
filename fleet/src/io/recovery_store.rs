//! Durable recovery-experience log (`.fleet/recovery_history.json`).
//!
//! The whole log is one JSON document, reloaded on open and rewritten
//! atomically (temp file + rename) on every append. A file that cannot be read
//! or written degrades the store to in-memory operation for the session; it is
//! never overwritten after a failed load.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{Pos, RecoveryExperience, RecoveryHistory, Strategy};

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryDocument {
    experiences: Vec<RecoveryExperience>,
}

/// Whether a mutation reached stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    Durable,
    MemoryOnly,
}

/// Per-strategy outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyStats {
    pub successes: usize,
    pub failures: usize,
}

#[derive(Debug)]
pub struct RecoveryStore {
    path: Option<PathBuf>,
    experiences: RwLock<Vec<RecoveryExperience>>,
    /// Serializes append + persist so the file always matches a prefix of memory.
    writer: Mutex<()>,
    durable: AtomicBool,
}

impl RecoveryStore {
    /// Open the store at `path`, loading any existing history.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (experiences, durable) = match load_history(&path) {
            Ok(experiences) => (experiences, true),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "recovery history unreadable; continuing in memory only"
                );
                (Vec::new(), false)
            }
        };
        debug!(path = %path.display(), count = experiences.len(), durable, "recovery store opened");
        Self {
            path: Some(path),
            experiences: RwLock::new(experiences),
            writer: Mutex::new(()),
            durable: AtomicBool::new(durable),
        }
    }

    /// A store with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            experiences: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
            durable: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::SeqCst)
    }

    /// Append one experience and persist before returning.
    pub fn record(&self, agent_id: &str, location: Pos, strategy: Strategy, success: bool) -> Durability {
        let _writer = self.writer.lock();
        let document = {
            let mut experiences = self.experiences.write();
            experiences.push(RecoveryExperience {
                agent_id: agent_id.to_string(),
                location,
                strategy,
                success,
            });
            HistoryDocument {
                experiences: experiences.clone(),
            }
        };
        debug!(agent = agent_id, %location, %strategy, success, "recovery experience recorded");
        self.persist(&document)
    }

    /// Outcomes at exactly `(agent_id, location)`, in recorded order.
    pub fn query(&self, agent_id: &str, location: Pos) -> RecoveryHistory {
        let experiences = self.experiences.read();
        let mut history = RecoveryHistory::default();
        for exp in experiences
            .iter()
            .filter(|exp| exp.agent_id == agent_id && exp.location == location)
        {
            if exp.success {
                history.successes.push(exp.strategy);
            } else {
                history.failures.push(exp.strategy);
            }
        }
        history
    }

    /// Wipe all experiences. Only for controlled experiment resets.
    pub fn clear(&self) -> Durability {
        let _writer = self.writer.lock();
        self.experiences.write().clear();
        self.persist(&HistoryDocument::default())
    }

    pub fn experiences(&self) -> Vec<RecoveryExperience> {
        self.experiences.read().clone()
    }

    pub fn len(&self) -> usize {
        self.experiences.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiences.read().is_empty()
    }

    pub fn summary(&self) -> BTreeMap<Strategy, StrategyStats> {
        let mut stats: BTreeMap<Strategy, StrategyStats> = BTreeMap::new();
        for exp in self.experiences.read().iter() {
            let entry = stats.entry(exp.strategy).or_default();
            if exp.success {
                entry.successes += 1;
            } else {
                entry.failures += 1;
            }
        }
        stats
    }

    fn persist(&self, document: &HistoryDocument) -> Durability {
        let Some(path) = self.path.as_deref() else {
            return Durability::MemoryOnly;
        };
        if !self.is_durable() {
            return Durability::MemoryOnly;
        }
        match write_history(path, document) {
            Ok(()) => Durability::Durable,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %format!("{err:#}"),
                    "recovery history write failed; continuing in memory only"
                );
                self.durable.store(false, Ordering::SeqCst);
                Durability::MemoryOnly
            }
        }
    }
}

fn load_history(path: &Path) -> Result<Vec<RecoveryExperience>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    let document: HistoryDocument =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(document.experiences)
}

fn write_history(path: &Path, document: &HistoryDocument) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(document).context("serialize recovery history")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("history path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp history {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace history {}", path.display()))?;
    Ok(())
}
