//! Durable watermarks and in-flight job handles.
//!
//! Persists two flat JSON documents keyed by connection id under the state
//! directory:
//!
//! ```text
//! <state_dir>/last_sync_timestamps.json   { "<connection>": "<RFC 3339>" }
//! <state_dir>/active_jobs.json            { "<connection>": "<job id>" }
//! ```
//!
//! Each document is written to `<file>.tmp`, fsynced and renamed into place, so a
//! reader never observes a half-written map. The watermark document is
//! written first: a crash between the two renames leaves the job handle in
//! place and the next cycle re-confirms the job instead of re-triggering.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use syncwatch_core::types::{ConnectionId, JobHandle};

use crate::error::{io_err, StoreError};

pub const WATERMARKS_FILE: &str = "last_sync_timestamps.json";
pub const ACTIVE_JOBS_FILE: &str = "active_jobs.json";

/// Connection id → time up to which data is known to be synced.
pub type WatermarkMap = BTreeMap<ConnectionId, DateTime<Utc>>;

/// Connection id → handle of the job that may still be in flight.
pub type ActiveJobMap = BTreeMap<ConnectionId, JobHandle>;

/// Both state maps, loaded and saved together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub watermarks: WatermarkMap,
    pub active_jobs: ActiveJobMap,
}

impl OrchestratorState {
    /// Last synced time; `None` means never synced.
    pub fn watermark(&self, id: &ConnectionId) -> Option<DateTime<Utc>> {
        self.watermarks.get(id).copied()
    }

    pub fn active_job(&self, id: &ConnectionId) -> Option<&JobHandle> {
        self.active_jobs.get(id)
    }

    /// Move the watermark forward to `at`. Never moves it backwards.
    ///
    /// Returns the watermark in effect afterwards.
    pub fn advance_watermark(&mut self, id: &ConnectionId, at: DateTime<Utc>) -> DateTime<Utc> {
        let entry = self.watermarks.entry(id.clone()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
        *entry
    }

    pub fn set_active_job(&mut self, id: &ConnectionId, handle: JobHandle) {
        self.active_jobs.insert(id.clone(), handle);
    }

    pub fn clear_active_job(&mut self, id: &ConnectionId) -> Option<JobHandle> {
        self.active_jobs.remove(id)
    }
}

/// Durable home of [`OrchestratorState`].
///
/// `load` on an empty backing store returns the default state; malformed
/// content is [`StoreError::Corrupt`], never an empty map.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<OrchestratorState, StoreError>;
    fn save(&self, state: &OrchestratorState) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// JSON files under a state directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn watermarks_path(&self) -> PathBuf {
        self.dir.join(WATERMARKS_FILE)
    }

    pub fn active_jobs_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_JOBS_FILE)
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<OrchestratorState, StoreError> {
        // Older files may hold `null` for a never-synced connection.
        let raw_watermarks: BTreeMap<ConnectionId, Option<DateTime<Utc>>> =
            read_map(&self.watermarks_path())?;
        let watermarks = raw_watermarks
            .into_iter()
            .filter_map(|(id, at)| at.map(|at| (id, at)))
            .collect();
        let active_jobs = read_map(&self.active_jobs_path())?;
        Ok(OrchestratorState {
            watermarks,
            active_jobs,
        })
    }

    fn save(&self, state: &OrchestratorState) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        write_atomic(&self.watermarks_path(), &state.watermarks)?;
        write_atomic(&self.active_jobs_path(), &state.active_jobs)?;
        Ok(())
    }
}

fn read_map<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "state file not found; starting empty");
            return Ok(T::default());
        }
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes and fsyncs `<path>.tmp`, then renames it over `<path>`.
fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    write_synced(&tmp, json.as_bytes()).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    tracing::debug!(path = %path.display(), "state file updated");
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Non-durable store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<OrchestratorState>,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn new(state: OrchestratorState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> OrchestratorState {
        self.state
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<OrchestratorState, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &OrchestratorState) -> Result<(), StoreError> {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = state.clone();
        drop(guard);
        let mut saves = self
            .saves
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *saves += 1;
        Ok(())
    }
}
