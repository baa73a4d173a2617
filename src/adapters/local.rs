//! Transfer from a locally mounted archive (NAS share, USB disk).

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use super::{DirectoryListing, Transfer, TransferError, TransferOutput, TransferRequest};

/// Transfer that treats the remote root as a local directory
#[derive(Debug, Clone, Default)]
pub struct LocalTransfer;

impl LocalTransfer {
    pub fn new() -> Self {
        Self
    }

    fn check_dir(path: &Path) -> Result<(), TransferError> {
        let what = path.display().to_string();
        let metadata = fs::metadata(path).map_err(|e| TransferError::from_io(&e, &what))?;
        if !metadata.is_dir() {
            return Err(TransferError::Unreachable(format!("{} is not a directory", what)));
        }
        fs::read_dir(path).map_err(|e| TransferError::from_io(&e, &what))?;
        Ok(())
    }
}

#[async_trait]
impl Transfer for LocalTransfer {
    fn name(&self) -> &str {
        "local"
    }

    async fn probe(&self, root: &str, cancel: &CancellationToken) -> Result<(), TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        Self::check_dir(Path::new(root))
    }

    #[instrument(skip(self, cancel))]
    async fn list_directories(
        &self,
        root: &str,
        cancel: &CancellationToken,
    ) -> Result<DirectoryListing, TransferError> {
        self.probe(root, cancel).await?;

        let root = Path::new(root);
        let lines = WalkDir::new(root)
            .min_depth(1)
            .follow_links(true)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(root)
                    .ok()
                    .map(|rel| format!("{}/", rel.to_string_lossy()))
            })
            .collect();

        Ok(DirectoryListing { lines })
    }

    #[instrument(skip(self, request, cancel), fields(source = %request.source))]
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferOutput, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let source = PathBuf::from(&request.source);
        Self::check_dir(&source)?;

        let dest = &request.destination;
        let dest_name = dest.display().to_string();
        fs::create_dir_all(dest).map_err(|e| TransferError::from_io(&e, &dest_name))?;

        let wanted = |name: &str| request.filter.matches(name);
        let mut files = Vec::new();

        let entries =
            fs::read_dir(&source).map_err(|e| TransferError::from_io(&e, &request.source))?;
        for entry in entries.filter_map(Result::ok) {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().to_string();
            if !is_file || !wanted(&name) {
                continue;
            }
            fs::copy(entry.path(), dest.join(&name))
                .map_err(|e| TransferError::Other(format!("copy {}: {}", name, e)))?;
            files.push(name);
        }

        // Mirror deletions of matching files, like `rsync --delete`
        let existing = fs::read_dir(dest).map_err(|e| TransferError::from_io(&e, &dest_name))?;
        for entry in existing.filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy().to_string();
            if wanted(&name) && !source.join(&name).exists() {
                debug!(file = %name, "deleting file no longer in source");
                fs::remove_file(entry.path())
                    .map_err(|e| TransferError::Other(format!("delete {}: {}", name, e)))?;
            }
        }

        files.sort();
        Ok(TransferOutput { files })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FilterSpec;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_probe_missing_root_is_unreachable() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nas");

        let result = LocalTransfer::new()
            .probe(&missing.to_string_lossy(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(TransferError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_listing_marks_directories() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("2020/trip")).unwrap();
        fs::write(temp.path().join("2020/trip/a.jpg"), b"a").unwrap();

        let listing = LocalTransfer::new()
            .list_directories(&temp.path().to_string_lossy(), &CancellationToken::new())
            .await
            .unwrap();

        let mut lines = listing.lines.clone();
        lines.sort();
        assert_eq!(lines, vec!["2020/", "2020/trip/"]);
    }

    #[tokio::test]
    async fn test_transfer_mirrors_matching_files() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("a.jpg"), b"a").unwrap();
        fs::write(src.join("notes.txt"), b"n").unwrap();
        fs::write(dst.join("stale.jpg"), b"s").unwrap();
        fs::write(dst.join("keep.txt"), b"k").unwrap();

        let request = TransferRequest {
            source: src.to_string_lossy().to_string(),
            destination: dst.clone(),
            filter: FilterSpec::media(),
        };
        let output = LocalTransfer::new()
            .transfer(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.files, vec!["a.jpg"]);
        assert!(dst.join("a.jpg").exists());
        assert!(!dst.join("notes.txt").exists());
        assert!(!dst.join("stale.jpg").exists());
        assert!(dst.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn test_transfer_cancelled() {
        let temp = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = TransferRequest {
            source: temp.path().to_string_lossy().to_string(),
            destination: temp.path().join("dst"),
            filter: FilterSpec::media(),
        };
        let result = LocalTransfer::new().transfer(&request, &cancel).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }
}
