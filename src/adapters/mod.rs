//! Transfer collaborators.
//!
//! The sync engine never moves bytes itself. It asks a `Transfer`
//! implementation to probe a root, list its directories, or mirror one
//! directory into a local destination.

pub mod local;
pub mod rsync;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::{media_patterns, DirectoryId};

// Re-export the transfer implementations
pub use local::LocalTransfer;
pub use rsync::RsyncTransfer;

/// Classified transfer failure
#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Transfer failed: {0}")]
    Other(String),

    #[error("Transfer timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Failures that mean "the remote is down"; the engine degrades to the library
    pub fn is_remote_down(&self) -> bool {
        matches!(
            self,
            TransferError::Unreachable(_)
                | TransferError::PermissionDenied(_)
                | TransferError::ConnectionReset(_)
        )
    }

    /// Timeouts and cancellation abort the cycle without committing anything
    pub fn is_interrupted(&self) -> bool {
        matches!(self, TransferError::TimedOut(_) | TransferError::Cancelled)
    }

    /// Classify a local I/O failure on `what`
    pub fn from_io(err: &io::Error, what: &str) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => TransferError::Unreachable(format!("{}: {}", what, err)),
            io::ErrorKind::PermissionDenied => {
                TransferError::PermissionDenied(format!("{}: {}", what, err))
            }
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransferError::ConnectionReset(format!("{}: {}", what, err))
            }
            _ => TransferError::Other(format!("{}: {}", what, err)),
        }
    }
}

/// Which files a transfer copies (by file name)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSpec {
    /// Shell-style include patterns; everything else is excluded
    pub include: Vec<String>,
}

impl FilterSpec {
    /// Accepted image and video files only
    pub fn media() -> Self {
        Self {
            include: media_patterns(),
        }
    }

    /// Check a file name against the include patterns
    pub fn matches(&self, file_name: &str) -> bool {
        self.include
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|p| p.matches(file_name))
    }
}

/// One directory mirror request
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Source directory in the transfer's own addressing (e.g. `host:/photos/2020/trip/`)
    pub source: String,

    /// Local destination directory
    pub destination: PathBuf,

    /// Files to copy
    pub filter: FilterSpec,
}

/// Result of a successful transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOutput {
    /// Names of the files that were transferred
    pub files: Vec<String>,
}

/// Raw directory listing of a root
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    /// Listing lines as produced by the transfer (directories end in `/`)
    pub lines: Vec<String>,
}

/// Trait for transfer collaborators
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Human-readable transfer name
    fn name(&self) -> &str;

    /// Lightweight reachability check of a root
    async fn probe(&self, root: &str, cancel: &CancellationToken) -> Result<(), TransferError>;

    /// List every directory below a root
    async fn list_directories(
        &self,
        root: &str,
        cancel: &CancellationToken,
    ) -> Result<DirectoryListing, TransferError>;

    /// Mirror the matching files of one directory into a local destination
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferOutput, TransferError>;
}

/// Address of a directory below a transfer root, with a trailing slash
pub fn source_path(root: &str, id: &DirectoryId) -> String {
    format!("{}/{}/", root.trim_end_matches('/'), id)
}
