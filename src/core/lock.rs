//! Advisory lock over the state directory.
//!
//! One cycle at a time may touch the history and the library. The lock is
//! released when the guard (and its file handle) is dropped.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

/// Held exclusive lock
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

/// Why the lock could not be taken
#[derive(Debug)]
pub enum LockFailure {
    /// Another process holds it
    Held,
    Io(io::Error),
}

impl StateLock {
    /// Take the lock without waiting
    pub fn acquire(path: &Path) -> Result<Self, LockFailure> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(LockFailure::Io)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(LockFailure::Io)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "state lock acquired");
                Ok(Self {
                    file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(LockFailure::Held),
            Err(e) => Err(LockFailure::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
