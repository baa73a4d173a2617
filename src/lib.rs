//! screensaver - Random photo album sync for a picture frame
//!
//! Each run picks one album (a leaf directory) at random from a remote photo
//! archive, stages its media into a local working set for the display, and
//! keeps a size-bounded library of past albums so the frame keeps cycling
//! when the archive is offline.
//!
//! # Architecture
//!
//! - Albums are never repeated until every album in the catalog was shown
//! - The library is trimmed by random eviction after every store
//! - If the remote is down the cycle selects from the library instead
//! - Nothing is committed unless the working set holds media
//!
//! # Modules
//!
//! - `adapters`: Transfer collaborators (rsync, local mount)
//! - `core`: Selector, sync engine, state lock
//! - `domain`: Data structures (DirectoryId, Report)
//! - `library`: Catalogs, library cache, selection history
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Stage a new album
//! SCREENSAVER_INPUT_PATH=nas:/volume1/photo screensaver run
//!
//! # Inspect the library
//! screensaver library list
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod library;

// Re-export main types at crate root for convenience
pub use adapters::{LocalTransfer, RsyncTransfer, Transfer, TransferError};
pub use core::{EngineConfig, SyncEngine, SyncError};
pub use domain::{DirectoryId, Report, StagedFrom, SyncMode};
pub use library::{Catalog, HistoryStore, Library, SelectionHistory};
