//! Catalog of leaf content directories.
//!
//! A catalog is rebuilt every cycle, either from a local root (the library)
//! or from a transfer's directory listing (the remote archive). Only leaf
//! directories count: a directory is dropped as soon as any other listed
//! directory lies below it.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::path::Path;

use glob::Pattern;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::adapters::{Transfer, TransferError};
use crate::domain::DirectoryId;

/// Path segments that never hold content (NAS thumbnail caches, recycle bins)
pub const DEFAULT_MARKERS: &[&str] = &["@eaDir", "#recycle", ".@__thumb", "$RECYCLE.BIN"];

/// Errors from building a catalog
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Catalog source unavailable: {root}: {source}")]
    SourceUnavailable {
        root: String,
        #[source]
        source: TransferError,
    },

    #[error("No content directories found under {root}")]
    SourceEmpty { root: String },
}

/// Excludes directories by path segment
#[derive(Debug, Clone)]
pub struct MarkerFilter {
    patterns: Vec<Pattern>,
}

impl Default for MarkerFilter {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_MARKERS
                .iter()
                .filter_map(|m| Pattern::new(&Pattern::escape(m)).ok())
                .collect(),
        }
    }
}

impl MarkerFilter {
    /// Default markers plus extra glob patterns (matched against single segments)
    pub fn with_extra(extra: &[String]) -> Result<Self, glob::PatternError> {
        let mut filter = Self::default();
        for pattern in extra {
            filter.patterns.push(Pattern::new(pattern)?);
        }
        Ok(filter)
    }

    /// Add one more segment pattern
    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.patterns.push(pattern);
        self
    }

    /// Check a single path segment
    pub fn is_marker(&self, segment: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(segment))
    }

    /// Check every segment of an id
    pub fn excludes(&self, id: &DirectoryId) -> bool {
        id.segments().any(|s| self.is_marker(s))
    }
}

/// The set of leaf directories discoverable under a root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Catalog {
    entries: BTreeSet<DirectoryId>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from any set of directories, keeping only the leaves
    pub fn from_directories(dirs: impl IntoIterator<Item = DirectoryId>) -> Self {
        Self {
            entries: leaf_directories(dirs),
        }
    }

    /// Enumerate a local root (e.g. the library)
    pub fn build_local(root: &Path, markers: &MarkerFilter) -> Result<Self, CatalogError> {
        let root_name = root.display().to_string();
        let dirs = scan_directories(root, markers).map_err(|source| {
            CatalogError::SourceUnavailable {
                root: root_name.clone(),
                source,
            }
        })?;

        Self::non_empty(Self::from_directories(dirs), root_name)
    }

    /// Enumerate a root through a transfer's listing (e.g. the remote archive)
    pub async fn build_remote(
        transfer: &dyn Transfer,
        root: &str,
        markers: &MarkerFilter,
        cancel: &CancellationToken,
    ) -> Result<Self, CatalogError> {
        let listing = transfer
            .list_directories(root, cancel)
            .await
            .map_err(|source| CatalogError::SourceUnavailable {
                root: root.to_string(),
                source,
            })?;

        let dirs = parse_listing(&listing.lines, markers);
        debug!(root, listed = listing.lines.len(), dirs = dirs.len(), "parsed remote listing");

        Self::non_empty(Self::from_directories(dirs), root.to_string())
    }

    fn non_empty(catalog: Self, root: String) -> Result<Self, CatalogError> {
        if catalog.is_empty() {
            Err(CatalogError::SourceEmpty { root })
        } else {
            Ok(catalog)
        }
    }

    /// Check membership
    pub fn contains(&self, id: &DirectoryId) -> bool {
        self.entries.contains(id)
    }

    /// Iterate in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &DirectoryId> {
        self.entries.iter()
    }

    /// Get the number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted entries
    pub fn to_vec(&self) -> Vec<DirectoryId> {
        self.entries.iter().cloned().collect()
    }
}

/// Keep only directories with no other listed directory below them.
///
/// Ancestry is decided per path segment, so `a` is not an ancestor of `ab`
/// or `a b`. Runs in O(n log n): in sorted order every descendant of `p`
/// sorts at or after `p/`, so one range probe per entry is enough.
pub fn leaf_directories(dirs: impl IntoIterator<Item = DirectoryId>) -> BTreeSet<DirectoryId> {
    let all: BTreeSet<DirectoryId> = dirs.into_iter().collect();

    all.iter()
        .filter(|dir| {
            let prefix = format!("{}/", dir);
            !all.range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
                .next()
                .is_some_and(|next| dir.is_ancestor_of(next))
        })
        .cloned()
        .collect()
}

/// Lines an rsync listing prints that are not directories of the root
pub fn is_listing_artifact(line: &str) -> bool {
    let line = line.trim();
    line == "./"
        || line.starts_with("./")
        || line.contains("bytes/sec")
        || line.starts_with("total size is")
        || line.starts_with("created directory")
        || line.ends_with("incremental file list")
        || line.starts_with("skipping non-regular file")
}

/// Extract directory ids from a textual listing.
///
/// Keeps lines ending in `/`, drops transport artifacts and anything below a
/// non-content marker.
pub fn parse_listing(lines: &[String], markers: &MarkerFilter) -> Vec<DirectoryId> {
    lines
        .iter()
        .map(|line| line.trim_end())
        .filter(|line| line.ends_with('/'))
        .filter(|line| !is_listing_artifact(line))
        .filter_map(|line| DirectoryId::new(line).ok())
        .filter(|id| !markers.excludes(id))
        .collect()
}

/// Every directory below `root` (not the root itself), minus marker subtrees
pub fn scan_directories(
    root: &Path,
    markers: &MarkerFilter,
) -> Result<Vec<DirectoryId>, TransferError> {
    let what = root.display().to_string();
    let metadata = std::fs::metadata(root).map_err(|e| TransferError::from_io(&e, &what))?;
    if !metadata.is_dir() {
        return Err(TransferError::Unreachable(format!("{} is not a directory", what)));
    }

    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !markers.is_marker(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %what, error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        match DirectoryId::from_relative_path(relative) {
            Ok(id) => dirs.push(id),
            Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping directory"),
        }
    }

    Ok(dirs)
}
