//! Stage checkpoints for resuming an interrupted run.
//!
//! A checkpoint is a JSON payload stored under a stage name. The collector
//! saves after collection, the pipeline after analysis; a restarted run loads
//! them to skip finished stages and clears them once the run completes.

use crate::error::Result;
use crate::models::DateWindow;
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Pipeline stages that leave a checkpoint behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    DataCollection,
    Analysis,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DataCollection => "data_collection",
            Stage::Analysis => "analysis",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inputs a checkpoint was produced from.
///
/// Topics are order-insensitive and the window is compared by calendar day,
/// so a restart later the same day still matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunScope {
    pub topics: Vec<String>,
    pub start_date: String,
    pub end_date: String,
}

impl RunScope {
    pub fn new(topics: &[String], window: &DateWindow) -> Self {
        let mut topics = topics.to_vec();
        topics.sort_unstable();
        Self {
            topics,
            start_date: window.start_date(),
            end_date: window.end_date(),
        }
    }
}

pub trait CheckpointStore: Send + Sync {
    fn save(&self, stage: &str, payload: &serde_json::Value) -> Result<()>;

    /// `None` when nothing usable is stored.
    fn load(&self, stage: &str) -> Option<serde_json::Value>;

    fn clear(&self, stage: &str);
}

impl dyn CheckpointStore {
    pub fn save_as<T: Serialize>(&self, stage: Stage, value: &T) -> Result<()> {
        self.save(stage.as_str(), &serde_json::to_value(value)?)
    }

    /// Load and deserialize; a payload of the wrong shape counts as absent.
    pub fn load_as<T: DeserializeOwned>(&self, stage: Stage) -> Option<T> {
        let value = self.load(stage.as_str())?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(%stage, error = %e, "Ignoring checkpoint with unexpected shape");
                None
            }
        }
    }

    pub fn clear_stage(&self, stage: Stage) {
        self.clear(stage.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    timestamp: DateTime<Local>,
    data: serde_json::Value,
}

/// One `<dir>/<stage>.json` file per stage.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, stage: &str) -> PathBuf {
        self.dir.join(format!("{stage}.json"))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, stage: &str, payload: &serde_json::Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(stage);
        let envelope = Envelope {
            timestamp: Local::now(),
            data: payload.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        info!(stage, path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    fn load(&self, stage: &str) -> Option<serde_json::Value> {
        let path = self.path_for(stage);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(stage, error = %e, "Unreadable checkpoint");
                return None;
            }
        };
        match serde_json::from_slice::<Envelope>(&bytes) {
            Ok(env) => {
                info!(stage, saved_at = %env.timestamp, "Loaded checkpoint");
                Some(env.data)
            }
            Err(e) => {
                warn!(stage, error = %e, "Corrupt checkpoint ignored");
                None
            }
        }
    }

    fn clear(&self, stage: &str) {
        let path = self.path_for(stage);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(stage, "Cleared checkpoint"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(stage, error = %e, "Failed to clear checkpoint"),
        }
    }
}

/// In-process store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, stage: &str, payload: &serde_json::Value) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(stage.to_string(), payload.clone());
        }
        Ok(())
    }

    fn load(&self, stage: &str) -> Option<serde_json::Value> {
        self.entries.lock().ok()?.get(stage).cloned()
    }

    fn clear(&self, stage: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(stage);
        }
    }
}
