//! State store - last-applied resource state, persisted between runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::types::{ApplyReport, PropertyMap, Urn};

/// Format version written to state files
pub const STATE_VERSION: u32 = 1;

/// Last-applied state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub urn: Urn,
    #[serde(rename = "type")]
    pub type_name: String,
    /// Provider-assigned id
    pub id: String,
    /// Concrete inputs as applied
    #[serde(default)]
    pub inputs: PropertyMap,
    #[serde(default)]
    pub outputs: PropertyMap,
    #[serde(default)]
    pub dependencies: BTreeSet<Urn>,
}

/// Everything the store knows about a stack
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    records: BTreeMap<Urn, StateRecord>,
    /// Stack outputs from the last apply
    pub exports: PropertyMap,
}

impl StateSnapshot {
    pub fn get(&self, urn: &Urn) -> Option<&StateRecord> {
        self.records.get(urn)
    }

    pub fn contains(&self, urn: &Urn) -> bool {
        self.records.contains_key(urn)
    }

    pub fn records(&self) -> impl Iterator<Item = &StateRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert or replace a record
    pub fn insert(&mut self, record: StateRecord) {
        self.records.insert(record.urn.clone(), record);
    }

    pub fn remove(&mut self, urn: &Urn) -> Option<StateRecord> {
        self.records.remove(urn)
    }

    /// Fold the outcome of an apply into the snapshot.
    ///
    /// Succeeded nodes replace their record (deletes drop it). Failed and
    /// skipped nodes keep whatever was recorded before. Exports that did not
    /// resolve keep their previous value.
    pub fn commit(&mut self, report: &ApplyReport) {
        for (urn, result) in &report.succeeded {
            match &result.record {
                Some(record) => self.insert(record.clone()),
                None => {
                    self.records.remove(urn);
                }
            }
        }

        let mut exports = report.exports.clone();
        for name in report.unresolved_exports.keys() {
            if let Some(previous) = self.exports.get(name) {
                exports.insert(name.clone(), previous.clone());
            }
        }
        self.exports = exports;
    }
}

/// Persistence for state snapshots
pub trait StateStore {
    fn load(&self) -> Result<StateSnapshot>;

    /// Replace the stored snapshot
    fn save(&self, snapshot: &StateSnapshot) -> Result<()>;
}

/// In-memory store, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<StateSnapshot>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of times `save` was called
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateSnapshot> {
        Ok(self
            .snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// On-disk layout of a state file
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    last_updated: DateTime<Utc>,
    #[serde(default)]
    resources: Vec<StateRecord>,
    #[serde(default)]
    exports: PropertyMap,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// JSON file store, one file per stack
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the state file was last written, if it exists
    pub fn last_updated(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read_file()?.map(|file| file.last_updated))
    }

    fn read_file(&self) -> Result<Option<StateFile>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("No state file at {}", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(Error::StateIo {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let format_error = |source| Error::StateFormat {
            path: self.path.clone(),
            source,
        };
        let probe: VersionProbe = serde_json::from_str(&content).map_err(format_error)?;
        if probe.version != STATE_VERSION {
            return Err(Error::StateVersion {
                path: self.path.clone(),
                found: probe.version,
                expected: STATE_VERSION,
            });
        }

        serde_json::from_str(&content).map(Some).map_err(format_error)
    }

    fn io_error(&self, source: io::Error) -> Error {
        Error::StateIo {
            path: self.path.clone(),
            source,
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<StateSnapshot> {
        let Some(file) = self.read_file()? else {
            return Ok(StateSnapshot::default());
        };

        let mut snapshot = StateSnapshot {
            exports: file.exports,
            ..Default::default()
        };
        for record in file.resources {
            snapshot.insert(record);
        }
        log::debug!(
            "Loaded {} records from {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(snapshot)
    }

    fn save(&self, snapshot: &StateSnapshot) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| self.io_error(e))?;
        }

        let file = StateFile {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            resources: snapshot.records().cloned().collect(),
            exports: snapshot.exports.clone(),
        };
        let content = serde_json::to_string_pretty(&file).map_err(|source| Error::StateFormat {
            path: self.path.clone(),
            source,
        })?;

        // Write then rename so a crash never leaves a truncated state file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        log::debug!(
            "Saved {} records to {}",
            snapshot.len(),
            self.path.display()
        );
        Ok(())
    }
}
