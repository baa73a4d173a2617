//! Size-bounded local mirror of remote albums.
//!
//! Every leaf directory below the library root is one cache entry, stored at
//! the same relative path it has on the remote. After each store the library
//! evicts uniformly random entries until its footprint fits the budget again.
//! Selection is random and not weighted by recency, so random eviction keeps
//! the library a fair sample of the remote archive.

use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::catalog::{scan_directories, Catalog, CatalogError, MarkerFilter};
use super::fsops::{self, CopyStats};
use crate::adapters::TransferError;
use crate::domain::{is_media, DirectoryId};

/// Prefix of in-flight store directories (never part of the catalog)
const INCOMING_PREFIX: &str = ".incoming-";

/// Library errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Not in library: {0}")]
    NotCached(DirectoryId),

    #[error("Library root unavailable: {0}")]
    Unavailable(#[source] TransferError),

    #[error("Library I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
        move |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One mirrored album and its footprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub id: DirectoryId,
    pub bytes: u64,
}

/// The library
#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    budget: u64,
    markers: MarkerFilter,
    dir_mode: Option<u32>,
}

impl Library {
    /// Open (and create if needed) a library rooted at `root`
    pub fn open(
        root: impl Into<PathBuf>,
        budget: u64,
        markers: MarkerFilter,
    ) -> Result<Self, CacheError> {
        let root = root.into();
        fsops::ensure_dir(&root, None).map_err(CacheError::io(&root))?;

        let markers = match Pattern::new(&format!("{}*", Pattern::escape(INCOMING_PREFIX))) {
            Ok(pattern) => markers.with_pattern(pattern),
            Err(_) => markers,
        };

        Ok(Self {
            root,
            budget,
            markers,
            dir_mode: None,
        })
    }

    /// Apply a permission mode to directories created in the library
    pub fn with_dir_mode(mut self, mode: Option<u32>) -> Self {
        self.dir_mode = mode;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    fn entry_path(&self, id: &DirectoryId) -> PathBuf {
        id.under(&self.root)
    }

    /// True iff an entry exists for `id`
    pub fn has(&self, id: &DirectoryId) -> bool {
        self.entry_path(id).is_dir()
    }

    /// Copy the media of a cached entry into `working`
    pub fn fetch(&self, id: &DirectoryId, working: &Path) -> Result<CopyStats, CacheError> {
        if !self.has(id) {
            return Err(CacheError::NotCached(id.clone()));
        }

        let src = self.entry_path(id);
        let stats = fsops::copy_files(&src, working, is_media).map_err(CacheError::io(&src))?;
        debug!(%id, files = stats.files, bytes = stats.bytes, "fetched from library");
        Ok(stats)
    }

    /// Mirror the media in `source` as the entry for `id`, then enforce the budget.
    ///
    /// Entries nested with `id` (an ancestor album that would stop being a
    /// leaf, or descendants the new entry replaces) are evicted first.
    /// Returns every evicted id, displaced ones first, then those dropped to
    /// get back under budget (possibly `id` itself).
    pub fn store<R: Rng + ?Sized>(
        &self,
        id: &DirectoryId,
        source: &Path,
        rng: &mut R,
    ) -> Result<Vec<DirectoryId>, CacheError> {
        let dest = self.entry_path(id);

        // Copy next to the library first so a failed copy never replaces a good entry
        let incoming = tempfile::Builder::new()
            .prefix(INCOMING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(CacheError::io(&self.root))?;
        let stats =
            fsops::copy_files(source, incoming.path(), is_media).map_err(CacheError::io(source))?;

        let mut evicted = self.displace(id)?;
        fsops::remove_dir_if_exists(&dest).map_err(CacheError::io(&dest))?;
        if let Some(parent) = dest.parent() {
            fsops::ensure_dir(parent, None).map_err(CacheError::io(parent))?;
        }
        std::fs::rename(incoming.path(), &dest).map_err(CacheError::io(&dest))?;
        if let Some(mode) = self.dir_mode {
            fsops::ensure_dir(&dest, Some(mode)).map_err(CacheError::io(&dest))?;
        }

        info!(%id, files = stats.files, bytes = stats.bytes, "stored in library");
        evicted.extend(self.trim(rng)?);
        Ok(evicted)
    }

    /// Evict entries above or below `id`
    fn displace(&self, id: &DirectoryId) -> Result<Vec<DirectoryId>, CacheError> {
        let nested: Vec<DirectoryId> = self
            .entries()?
            .into_iter()
            .map(|entry| entry.id)
            .filter(|other| other.is_ancestor_of(id) || id.is_ancestor_of(other))
            .collect();

        for other in &nested {
            info!(%id, displaced = %other, "entry nests with incoming album, evicting");
            self.evict(other)?;
        }
        Ok(nested)
    }

    /// Current entries and their footprints
    pub fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let dirs = scan_directories(&self.root, &self.markers).map_err(CacheError::Unavailable)?;

        Ok(Catalog::from_directories(dirs)
            .iter()
            .map(|id| CacheEntry {
                bytes: fsops::dir_size(&self.entry_path(id)),
                id: id.clone(),
            })
            .collect())
    }

    /// Aggregate footprint of all entries
    pub fn total_size(&self) -> Result<u64, CacheError> {
        Ok(self.entries()?.iter().map(|e| e.bytes).sum())
    }

    /// Remove an entry and its storage. Evicting an absent id only logs.
    ///
    /// Parent directories left empty are pruned so they do not turn into
    /// leaf entries themselves.
    pub fn evict(&self, id: &DirectoryId) -> Result<bool, CacheError> {
        let path = self.entry_path(id);
        let removed = fsops::remove_dir_if_exists(&path).map_err(CacheError::io(&path))?;

        if !removed {
            warn!(%id, "evict: not in library, nothing to do");
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fsops::prune_empty_parents(parent, &self.root).map_err(CacheError::io(parent))?;
        }
        info!(%id, "evicted from library");
        Ok(true)
    }

    /// Evict random entries until the footprint fits the budget or nothing is left
    pub fn trim<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<DirectoryId>, CacheError> {
        let mut entries = self.entries()?;
        let mut total: u64 = entries.iter().map(|e| e.bytes).sum();
        let mut evicted = Vec::new();

        while total > self.budget && !entries.is_empty() {
            let victim = entries.swap_remove(rng.gen_range(0..entries.len()));
            info!(
                id = %victim.id,
                bytes = victim.bytes,
                total,
                budget = self.budget,
                "library over budget, evicting random entry"
            );
            self.evict(&victim.id)?;
            total = total.saturating_sub(victim.bytes);
            evicted.push(victim.id);
        }

        Ok(evicted)
    }

    /// Catalog of the library itself (for local-only cycles)
    pub fn catalog(&self) -> Result<Catalog, CatalogError> {
        Catalog::build_local(&self.root, &self.markers)
    }
}
