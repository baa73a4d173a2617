//! Outcome of a single sync cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::directory::DirectoryId;

/// Where the staged content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Remote archive reachable; catalog built from the remote root
    Remote,

    /// Remote unreachable; catalog built from the library
    LocalOnly,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Remote => write!(f, "remote"),
            SyncMode::LocalOnly => write!(f, "local-only"),
        }
    }
}

/// How the working set was filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagedFrom {
    /// Copied out of the library, then refreshed from the remote
    LibraryRefreshed,

    /// Copied out of the library only
    Library,

    /// Transferred from the remote (new to the library)
    Remote,
}

/// Summary returned by a successful cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Unique identifier for this cycle (log correlation)
    pub cycle_id: Uuid,

    /// The directory now in the working set
    pub selection: DirectoryId,

    /// Mode the cycle finished in
    pub mode: SyncMode,

    /// How the working set was filled
    pub staged_from: StagedFrom,

    /// True if the remote was probed and found down
    pub fell_back: bool,

    /// True if the history was reset because every entry had been shown
    pub history_reset: bool,

    /// Number of media files in the working set
    pub staged_files: usize,

    /// Bytes of media in the working set
    pub staged_bytes: u64,

    /// Library footprint after the cycle committed
    pub library_bytes: u64,

    /// Library entries evicted while enforcing the budget
    pub evicted: Vec<DirectoryId>,

    /// Selections discarded because they contained no media
    pub skipped_empty: Vec<DirectoryId>,

    /// Number of selector draws used
    pub attempts: u32,

    /// Size of the catalog the selection was drawn from
    pub catalog_size: usize,

    /// When the cycle started
    pub started_at: DateTime<Utc>,

    /// When the cycle committed
    pub completed_at: DateTime<Utc>,
}
