//! Filesystem helpers for the working set and the library.
//!
//! Albums are leaf directories, so copies only consider the regular files
//! directly inside a directory.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

/// Files and bytes moved or counted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: usize,
    pub bytes: u64,
}

/// Create a directory (and parents) and apply a permission mode
pub fn ensure_dir(path: &Path, mode: Option<u32>) -> io::Result<()> {
    fs::create_dir_all(path)?;
    if let Some(mode) = mode {
        set_mode(path, mode)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Delete a directory tree if present. Returns whether anything was removed.
pub fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Delete and recreate a directory so it starts empty
pub fn reset_dir(path: &Path, mode: Option<u32>) -> io::Result<()> {
    if remove_dir_if_exists(path)? {
        debug!(path = %path.display(), "cleared directory");
    }
    ensure_dir(path, mode)
}

/// Copy the regular files directly inside `src` that pass `keep` into `dst`
pub fn copy_files<F>(src: &Path, dst: &Path, keep: F) -> io::Result<CopyStats>
where
    F: Fn(&Path) -> bool,
{
    fs::create_dir_all(dst)?;
    let mut stats = CopyStats::default();

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || !keep(&path) {
            continue;
        }
        stats.bytes += fs::copy(&path, dst.join(entry.file_name()))?;
        stats.files += 1;
    }

    Ok(stats)
}

/// Count the regular files directly inside `dir` that pass `keep`
pub fn count_files<F>(dir: &Path, keep: F) -> io::Result<CopyStats>
where
    F: Fn(&Path) -> bool,
{
    let mut stats = CopyStats::default();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && keep(&path) {
            stats.files += 1;
            stats.bytes += entry.metadata()?.len();
        }
    }

    Ok(stats)
}

/// Aggregate size in bytes of every file below `path` (0 if missing)
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Remove empty directories from `start` upwards, stopping at `stop_at`
pub fn prune_empty_parents(start: &Path, stop_at: &Path) -> io::Result<()> {
    let mut current = start.to_path_buf();

    while current != stop_at && current.starts_with(stop_at) {
        match fs::remove_dir(&current) {
            Ok(()) => debug!(path = %current.display(), "pruned empty directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            // Not empty (or not removable): stop climbing
            Err(_) => break,
        }
        if !current.pop() {
            break;
        }
    }

    Ok(())
}
