//! Sync engine: one cycle from remote check to committed selection.
//!
//! ```text
//! RemoteCheck ──reachable──▶ RemoteMode ──┐
//!      │                        │ fallback │
//!      └──down──▶ LocalOnlyMode ◀┘         ▼
//!                       └──────────────▶ Staged ──▶ Done
//! ```
//!
//! Nothing persistent changes before the commit point. The working set is
//! staged first; then the history is saved; only then is the library updated
//! (store + eviction). A failure before the commit leaves the history and
//! the library exactly as they were.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{source_path, FilterSpec, Transfer, TransferError, TransferRequest};
use crate::config::paths;
use crate::domain::{is_media, DirectoryId, Report, StagedFrom, SyncMode};
use crate::library::fsops::{self, CopyStats};
use crate::library::{
    CacheError, Catalog, CatalogError, CatalogSnapshot, HistoryRecord, HistoryStore, Library,
    MarkerFilter, PersistenceError, SelectionHistory,
};

use super::lock::{LockFailure, StateLock};
use super::selector::choose;

/// Default number of selector draws per mode before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Errors that end a cycle
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No content available: {reason}")]
    NoContentAvailable { reason: String },

    #[error("Catalog is empty: the remote archive has no albums and the library is empty")]
    CatalogEmpty,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Transfer failed: {0}")]
    Transfer(#[source] TransferError),

    #[error("Cycle interrupted: {0}")]
    Interrupted(#[source] TransferError),

    #[error("Another cycle holds the state lock {}", .0.display())]
    Busy(PathBuf),

    #[error(transparent)]
    Library(#[from] CacheError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SyncError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::NoContentAvailable { .. } => 2,
            SyncError::CatalogEmpty => 3,
            SyncError::Persistence(_) => 4,
            SyncError::Interrupted(_) => 5,
            SyncError::Busy(_) => 6,
            _ => 1,
        }
    }

    fn io(path: &Path) -> impl FnOnce(io::Error) -> SyncError + '_ {
        move |source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Everything a cycle needs, passed in explicitly
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Remote root in the transfer's addressing; `None` means library only
    pub remote_root: Option<String>,

    /// Working set read by the display
    pub working_dir: PathBuf,

    /// Library root
    pub library_dir: PathBuf,

    /// Persisted history record
    pub history_path: PathBuf,

    /// Advisory lock file
    pub lock_path: PathBuf,

    /// Library byte budget
    pub budget_bytes: u64,

    /// Selector draws per mode before the mode gives up
    pub max_attempts: u32,

    /// Extra non-content segment patterns
    pub exclude: Vec<String>,

    /// Permission mode for the working set and library entries
    pub dir_mode: Option<u32>,

    /// Skip the remote entirely
    pub local_only: bool,
}

impl EngineConfig {
    /// Standard layout below an output directory
    pub fn under(output: &Path, remote_root: Option<String>, budget_bytes: u64) -> Self {
        Self {
            remote_root,
            working_dir: paths::working_dir(output),
            library_dir: paths::library_dir(output),
            history_path: paths::history_file(output),
            lock_path: paths::lock_file(output),
            budget_bytes,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            exclude: Vec::new(),
            dir_mode: None,
            local_only: false,
        }
    }
}

/// Why remote mode handed over to the library
#[derive(Debug)]
enum Fallback {
    RemoteDown(TransferError),
    RemoteEmpty,
    NoMedia { attempts: u32 },
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::RemoteDown(e) => write!(f, "remote down: {}", e),
            Fallback::RemoteEmpty => write!(f, "remote catalog is empty"),
            Fallback::NoMedia { attempts } => {
                write!(f, "no media found in {} remote draws", attempts)
            }
        }
    }
}

enum ModeError {
    Fallback(Fallback),
    Fatal(SyncError),
}

impl From<SyncError> for ModeError {
    fn from(e: SyncError) -> Self {
        ModeError::Fatal(e)
    }
}

impl From<CacheError> for ModeError {
    fn from(e: CacheError) -> Self {
        ModeError::Fatal(e.into())
    }
}

/// Route a remote failure: interrupted aborts, remote-down falls back, anything else is fatal
fn remote_failure(err: TransferError) -> ModeError {
    if err.is_interrupted() {
        ModeError::Fatal(SyncError::Interrupted(err))
    } else if err.is_remote_down() {
        ModeError::Fallback(Fallback::RemoteDown(err))
    } else {
        ModeError::Fatal(SyncError::Transfer(err))
    }
}

enum RemoteCheck {
    Reachable(String),
    Down(TransferError),
    Skipped,
}

/// Result of a mode: a working set with media, not yet committed
struct Staged {
    selection: DirectoryId,
    mode: SyncMode,
    staged_from: StagedFrom,
    history: SelectionHistory,
    history_reset: bool,
    stats: CopyStats,
    skipped_empty: Vec<DirectoryId>,
    attempts: u32,
    catalog: Catalog,
}

/// The sync engine
pub struct SyncEngine {
    config: EngineConfig,
    transfer: Box<dyn Transfer>,
    markers: MarkerFilter,
    rng: StdRng,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Create an engine with an entropy-seeded random source
    pub fn new(config: EngineConfig, transfer: Box<dyn Transfer>) -> Result<Self, SyncError> {
        let markers = MarkerFilter::with_extra(&config.exclude)
            .map_err(|e| SyncError::Config(format!("bad exclude pattern: {}", e)))?;

        if config.max_attempts == 0 {
            return Err(SyncError::Config("max_attempts must be at least 1".to_string()));
        }

        Ok(Self {
            config,
            transfer,
            markers,
            rng: StdRng::from_entropy(),
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the random source (seeded for reproducible cycles)
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Use a caller-owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts the running cycle when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one cycle: select, stage, commit
    #[instrument(skip(self), fields(cycle_id = tracing::field::Empty))]
    pub async fn run_cycle(&mut self) -> Result<Report, SyncError> {
        let cycle_id = Uuid::new_v4();
        tracing::Span::current().record("cycle_id", tracing::field::display(cycle_id));
        let started_at = Utc::now();

        let lock_path = self.config.lock_path.clone();
        let lock = StateLock::acquire(&lock_path).map_err(|e| match e {
            LockFailure::Held => SyncError::Busy(lock_path.clone()),
            LockFailure::Io(source) => SyncError::Io {
                path: lock_path.clone(),
                source,
            },
        })?;
        debug!(lock = %lock.path().display(), "state lock acquired");

        let store = HistoryStore::new(&self.config.history_path);
        let record = store.load()?;
        info!(shown = record.already_used.len(), "loaded selection history");

        let library = Library::open(
            &self.config.library_dir,
            self.config.budget_bytes,
            self.markers.clone(),
        )?
        .with_dir_mode(self.config.dir_mode);

        let mut fell_back = false;
        let check = self.remote_check().await?;
        let staged = match check {
            RemoteCheck::Reachable(root) => match self
                .run_remote(&root, &library, &record.already_used)
                .await
            {
                Ok(staged) => staged,
                Err(ModeError::Fatal(e)) => return Err(e),
                Err(ModeError::Fallback(reason)) => {
                    warn!(%reason, "remote mode failed, selecting from library");
                    fell_back = true;
                    self.run_local(&library, &record.already_used, Some(&reason))?
                }
            },
            RemoteCheck::Down(err) => {
                fell_back = true;
                let reason = Fallback::RemoteDown(err);
                self.run_local(&library, &record.already_used, Some(&reason))?
            }
            RemoteCheck::Skipped => self.run_local(&library, &record.already_used, None)?,
        };

        if self.cancel.is_cancelled() {
            return Err(SyncError::Interrupted(TransferError::Cancelled));
        }

        // Commit point
        let next = HistoryRecord {
            version: 0,
            already_used: staged.history.clone(),
            remote_list: match staged.mode {
                SyncMode::Remote => CatalogSnapshot::Listed(staged.catalog.to_vec()),
                SyncMode::LocalOnly => CatalogSnapshot::default(),
            },
            local_list: library.catalog().map(|c| c.to_vec()).unwrap_or_default(),
            random_dir: Some(staged.selection.clone()),
            mode: Some(staged.mode),
            updated_at: Some(Utc::now()),
        };
        store.save(&next)?;
        info!(selection = %staged.selection, mode = %staged.mode, "selection committed");

        let mut evicted = Vec::new();
        if staged.staged_from != StagedFrom::Library {
            match library.store(&staged.selection, &self.config.working_dir, &mut self.rng) {
                Ok(ids) => evicted = ids,
                Err(e) => warn!(error = %e, "library update failed; working set is staged"),
            }
        }

        let library_bytes = library.total_size().unwrap_or_else(|e| {
            warn!(error = %e, "could not measure library");
            0
        });

        Ok(Report {
            cycle_id,
            selection: staged.selection,
            mode: staged.mode,
            staged_from: staged.staged_from,
            fell_back,
            history_reset: staged.history_reset,
            staged_files: staged.stats.files,
            staged_bytes: staged.stats.bytes,
            library_bytes,
            evicted,
            skipped_empty: staged.skipped_empty,
            attempts: staged.attempts,
            catalog_size: staged.catalog.len(),
            started_at,
            completed_at: Utc::now(),
        })
    }

    async fn remote_check(&self) -> Result<RemoteCheck, SyncError> {
        let root = match (&self.config.remote_root, self.config.local_only) {
            (Some(root), false) => root.clone(),
            (Some(_), true) => {
                info!("local-only requested, skipping remote");
                return Ok(RemoteCheck::Skipped);
            }
            (None, _) => {
                info!("no remote configured, selecting from library");
                return Ok(RemoteCheck::Skipped);
            }
        };

        match self.transfer.probe(&root, &self.cancel).await {
            Ok(()) => {
                info!(transfer = self.transfer.name(), "remote available");
                Ok(RemoteCheck::Reachable(root))
            }
            Err(e) if e.is_interrupted() => Err(SyncError::Interrupted(e)),
            Err(e) if e.is_remote_down() => {
                warn!(error = %e, "remote not available, selecting from library");
                Ok(RemoteCheck::Down(e))
            }
            Err(e) => Err(SyncError::Transfer(e)),
        }
    }

    #[instrument(skip(self, library, loaded))]
    async fn run_remote(
        &mut self,
        root: &str,
        library: &Library,
        loaded: &SelectionHistory,
    ) -> Result<Staged, ModeError> {
        let listed =
            Catalog::build_remote(self.transfer.as_ref(), root, &self.markers, &self.cancel).await;
        let catalog = match listed {
            Ok(catalog) => catalog,
            Err(CatalogError::SourceEmpty { .. }) => {
                return Err(ModeError::Fallback(Fallback::RemoteEmpty))
            }
            Err(CatalogError::SourceUnavailable { source, .. }) => {
                return Err(remote_failure(source))
            }
        };
        info!(albums = catalog.len(), "remote catalog built");

        let working = self.config.working_dir.clone();
        let mut history = loaded.clone();
        let mut history_reset = false;
        let mut skipped_empty = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            let selection = choose(&catalog, &mut history, &mut self.rng)
                .map_err(|_| ModeError::Fallback(Fallback::RemoteEmpty))?;
            history_reset |= selection.history_reset;
            let id = selection.id;
            info!(%id, attempt, "chosen directory");

            self.reset_working()?;
            let request = TransferRequest {
                source: source_path(root, &id),
                destination: working.clone(),
                filter: FilterSpec::media(),
            };

            let staged_from = if library.has(&id) {
                info!(%id, "in library, copying to working set");
                library.fetch(&id, &working)?;

                match self.transfer.transfer(&request, &self.cancel).await {
                    Ok(output) => {
                        debug!(
                            %id,
                            files = output.files.len(),
                            "refreshed working set from remote"
                        );
                        StagedFrom::LibraryRefreshed
                    }
                    Err(e) if e.is_interrupted() => {
                        return Err(ModeError::Fatal(SyncError::Interrupted(e)))
                    }
                    Err(e) => {
                        warn!(%id, error = %e, "refresh from remote failed, keeping library copy");
                        self.reset_working()?;
                        library.fetch(&id, &working)?;
                        StagedFrom::Library
                    }
                }
            } else {
                info!(%id, "not in library, transferring from remote");
                let output = self
                    .transfer
                    .transfer(&request, &self.cancel)
                    .await
                    .map_err(remote_failure)?;
                debug!(%id, files = output.files.len(), "transferred from remote");
                StagedFrom::Remote
            };

            let stats = self.working_media()?;
            if stats.files == 0 {
                info!(%id, "no media in working set, drawing again");
                skipped_empty.push(id);
                continue;
            }

            return Ok(Staged {
                selection: id,
                mode: SyncMode::Remote,
                staged_from,
                history,
                history_reset,
                stats,
                skipped_empty,
                attempts: attempt,
                catalog,
            });
        }

        self.clear_working()?;
        Err(ModeError::Fallback(Fallback::NoMedia {
            attempts: self.config.max_attempts,
        }))
    }

    #[instrument(skip(self, library, loaded, reason))]
    fn run_local(
        &mut self,
        library: &Library,
        loaded: &SelectionHistory,
        reason: Option<&Fallback>,
    ) -> Result<Staged, SyncError> {
        let catalog = match library.catalog() {
            Ok(catalog) => catalog,
            Err(CatalogError::SourceEmpty { .. }) => {
                return Err(match reason {
                    Some(Fallback::RemoteEmpty) => SyncError::CatalogEmpty,
                    _ => SyncError::NoContentAvailable {
                        reason: "the library is empty".to_string(),
                    },
                })
            }
            Err(CatalogError::SourceUnavailable { source, .. }) => {
                return Err(SyncError::NoContentAvailable {
                    reason: format!("the library is unavailable: {}", source),
                })
            }
        };
        info!(albums = catalog.len(), "library catalog built");

        let working = self.config.working_dir.clone();
        let mut history = loaded.clone();
        let mut history_reset = false;
        let mut skipped_empty = Vec::new();

        for attempt in 1..=self.config.max_attempts {
            let selection = choose(&catalog, &mut history, &mut self.rng)
                .map_err(|_| SyncError::CatalogEmpty)?;
            history_reset |= selection.history_reset;
            let id = selection.id;
            info!(%id, attempt, "chosen directory");

            self.reset_working()?;
            library.fetch(&id, &working)?;

            let stats = self.working_media()?;
            if stats.files == 0 {
                info!(%id, "no media in working set, drawing again");
                skipped_empty.push(id);
                continue;
            }

            return Ok(Staged {
                selection: id,
                mode: SyncMode::LocalOnly,
                staged_from: StagedFrom::Library,
                history,
                history_reset,
                stats,
                skipped_empty,
                attempts: attempt,
                catalog,
            });
        }

        self.clear_working()?;
        Err(SyncError::NoContentAvailable {
            reason: format!(
                "no media found in {} draws from the library",
                self.config.max_attempts
            ),
        })
    }

    fn reset_working(&self) -> Result<(), SyncError> {
        let working = &self.config.working_dir;
        fsops::reset_dir(working, self.config.dir_mode).map_err(SyncError::io(working))
    }

    /// Leave an empty working set rather than a dead selection
    fn clear_working(&self) -> Result<(), SyncError> {
        self.reset_working()
    }

    fn working_media(&self) -> Result<CopyStats, SyncError> {
        let working = &self.config.working_dir;
        fsops::count_files(working, is_media).map_err(SyncError::io(working))
    }
}
