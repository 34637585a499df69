//! Per-iteration checkpoints of a search job and the stores that persist them.

use super::config::SearchParams;
use crate::core::models::candidate::CandidateRecord;
use crate::core::models::ids::JobId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("JSON error for '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

/// Everything needed to rebuild a [`SearchContext`](super::context::SearchContext), addressed
/// by `(job_id, iteration)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSnapshot {
    pub job_id: JobId,
    pub iteration: u32,
    pub elapsed_seconds: f64,
    pub params: SearchParams,
    pub operators: Vec<String>,
    pub roots: Vec<String>,
    #[serde(default)]
    pub anchor: Option<String>,
    pub candidates: BTreeMap<String, CandidateRecord>,
    #[serde(default)]
    pub derivations: HashMap<String, u32>,
    #[serde(default)]
    pub pruned: Vec<String>,
}

impl IterationSnapshot {
    /// Best-scoring candidate, ties broken by key.
    pub fn best(&self) -> Option<&CandidateRecord> {
        let direction = self.params.direction();
        self.candidates
            .values()
            .min_by(|a, b| direction.best_first(a.score, b.score))
    }
}

pub trait SnapshotStore: Send + Sync {
    fn save(&self, snapshot: &IterationSnapshot) -> Result<(), SnapshotError>;

    fn load(&self, job: JobId, iteration: u32) -> Result<Option<IterationSnapshot>, SnapshotError>;

    /// Ids of every job with at least one stored snapshot, ascending.
    fn job_ids(&self) -> Result<Vec<JobId>, SnapshotError>;

    /// Highest iteration stored for `job`.
    fn latest_iteration(&self, job: JobId) -> Result<Option<u32>, SnapshotError>;

    fn load_latest(&self, job: JobId) -> Result<Option<IterationSnapshot>, SnapshotError> {
        match self.latest_iteration(job)? {
            Some(iteration) => self.load(job, iteration),
            None => Ok(None),
        }
    }
}

/// Stores snapshots as pretty-printed JSON at `<root>/<job>/<iteration:03>.json`.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    root: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job: JobId) -> PathBuf {
        self.root.join(job.to_string())
    }

    fn snapshot_path(&self, job: JobId, iteration: u32) -> PathBuf {
        self.job_dir(job).join(format!("{iteration:03}.json"))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn save(&self, snapshot: &IterationSnapshot) -> Result<(), SnapshotError> {
        let dir = self.job_dir(snapshot.job_id);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;

        let path = self.snapshot_path(snapshot.job_id, snapshot.iteration);
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| SnapshotError::Json {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        debug!(path = %path.display(), "Snapshot written");
        Ok(())
    }

    fn load(&self, job: JobId, iteration: u32) -> Result<Option<IterationSnapshot>, SnapshotError> {
        let path = self.snapshot_path(job, iteration);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| SnapshotError::Json {
                path: path.to_string_lossy().to_string(),
                source: e,
            })
    }

    fn job_ids(&self) -> Result<Vec<JobId>, SnapshotError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|name| name.parse::<u64>().ok()) {
                ids.push(JobId(id));
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn latest_iteration(&self, job: JobId) -> Result<Option<u32>, SnapshotError> {
        let dir = self.job_dir(job);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut latest = None;
        for entry in entries {
            let path = entry.map_err(|e| io_error(&dir, e))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let iteration = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u32>().ok());
            if let Some(iteration) = iteration {
                latest = latest.max(Some(iteration));
            }
        }
        Ok(latest)
    }
}

/// Keeps snapshots in memory; used when no storage directory is configured.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<BTreeMap<(JobId, u32), IterationSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn save(&self, snapshot: &IterationSnapshot) -> Result<(), SnapshotError> {
        self.snapshots
            .lock()
            .insert((snapshot.job_id, snapshot.iteration), snapshot.clone());
        Ok(())
    }

    fn load(&self, job: JobId, iteration: u32) -> Result<Option<IterationSnapshot>, SnapshotError> {
        Ok(self.snapshots.lock().get(&(job, iteration)).cloned())
    }

    fn job_ids(&self) -> Result<Vec<JobId>, SnapshotError> {
        let mut ids: Vec<JobId> = self.snapshots.lock().keys().map(|(job, _)| *job).collect();
        ids.dedup();
        Ok(ids)
    }

    fn latest_iteration(&self, job: JobId) -> Result<Option<u32>, SnapshotError> {
        Ok(self
            .snapshots
            .lock()
            .range((job, 0)..=(job, u32::MAX))
            .next_back()
            .map(|((_, iteration), _)| *iteration))
    }
}
