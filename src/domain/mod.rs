//! Domain types for the screensaver sync engine.
//!
//! This module contains the core data structures:
//! - DirectoryId: Identity of a leaf album across remote and library
//! - Media: The accepted image/video file filter
//! - Report: Outcome of a sync cycle

pub mod directory;
pub mod media;
pub mod report;

// Re-export commonly used types
pub use directory::{DirectoryId, InvalidDirectoryId};
pub use media::{is_media, media_patterns};
pub use report::{Report, StagedFrom, SyncMode};
