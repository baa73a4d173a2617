//! Persisted record of directories already shown.
//!
//! Stored as pretty JSON in `already_used.json` next to the library. The file
//! also keeps the catalogs of the last cycle for diagnostics. Older records
//! (ids with trailing slashes, `remote_list: "not available"`, no version)
//! load as-is.

use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::catalog::Catalog;
use crate::domain::{DirectoryId, SyncMode};

/// Current record format version
pub const RECORD_VERSION: u32 = 1;

/// Errors reading or writing the history record
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to read history {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write history {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize history: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Set of directory ids already presented
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionHistory {
    ids: BTreeSet<DirectoryId>,
}

impl SelectionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &DirectoryId) -> bool {
        self.ids.contains(id)
    }

    /// Record an id; returns false if it was already present
    pub fn insert(&mut self, id: DirectoryId) -> bool {
        self.ids.insert(id)
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectoryId> {
        self.ids.iter()
    }

    /// True if every catalog entry has already been shown
    pub fn covers(&self, catalog: &Catalog) -> bool {
        catalog.iter().all(|id| self.ids.contains(id))
    }
}

impl FromIterator<DirectoryId> for SelectionHistory {
    fn from_iter<I: IntoIterator<Item = DirectoryId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Snapshot of the remote catalog at the last cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CatalogSnapshot {
    Listed(Vec<DirectoryId>),
    /// The remote was not consulted (written as `"not available"`)
    Unavailable(String),
}

impl Default for CatalogSnapshot {
    fn default() -> Self {
        CatalogSnapshot::Unavailable("not available".to_string())
    }
}

/// Everything persisted between cycles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub version: u32,

    /// Directories shown in the current cycle of the catalog
    #[serde(default)]
    pub already_used: SelectionHistory,

    /// Remote catalog seen by the last cycle
    #[serde(default)]
    pub remote_list: CatalogSnapshot,

    /// Library catalog seen by the last cycle
    #[serde(default)]
    pub local_list: Vec<DirectoryId>,

    /// Last staged directory
    #[serde(default)]
    pub random_dir: Option<DirectoryId>,

    /// Mode of the last cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<SyncMode>,

    /// When the record was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// File-backed history store
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record. A missing file is a fresh start; a corrupt one is
    /// logged and treated the same way.
    pub fn load(&self) -> Result<HistoryRecord, PersistenceError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no history yet");
                return Ok(HistoryRecord::default());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match serde_json::from_str::<HistoryRecord>(&content) {
            Ok(record) => {
                debug!(shown = record.already_used.len(), "loaded history");
                Ok(record)
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "history is corrupt, starting fresh"
                );
                Ok(HistoryRecord::default())
            }
        }
    }

    /// Atomically replace the record (temp file in the same directory, then rename)
    pub fn save(&self, record: &HistoryRecord) -> Result<(), PersistenceError> {
        let write_err = |source: io::Error| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(write_err)?;

        let mut record = record.clone();
        record.version = RECORD_VERSION;
        let json = serde_json::to_string_pretty(&record)?;

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        file.write_all(json.as_bytes()).map_err(write_err)?;
        file.flush().map_err(write_err)?;
        file.persist(&self.path).map_err(|e| write_err(e.error))?;

        debug!(path = %self.path.display(), shown = record.already_used.len(), "saved history");
        Ok(())
    }

    /// Delete the record
    pub fn reset(&self) -> Result<(), PersistenceError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
