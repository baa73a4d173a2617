//! Directory identifiers shared by the remote archive and the local library.
//!
//! A `DirectoryId` is the path of a leaf album relative to whichever root it
//! was discovered under. The same id names the same album on the remote side
//! and in the library, so it is always stored in a normalized form:
//! forward slashes, no leading `./`, no leading or trailing slash.

use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected directory identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDirectoryId {
    #[error("Directory id is empty")]
    Empty,

    #[error("Directory id escapes its root: {0}")]
    ParentReference(String),

    #[error("Directory id is not valid UTF-8: {0}")]
    NotUtf8(String),
}

/// Relative path of a leaf content directory
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DirectoryId(String);

impl DirectoryId {
    /// Parse and normalize an identifier.
    ///
    /// Trailing whitespace and slashes are dropped, so `"2020/trip/"` and
    /// `"./2020/trip"` both become `"2020/trip"`.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, InvalidDirectoryId> {
        let raw = raw.as_ref().trim_end();
        let mut segments = Vec::new();

        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => return Err(InvalidDirectoryId::ParentReference(raw.to_string())),
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            return Err(InvalidDirectoryId::Empty);
        }

        Ok(Self(segments.join("/")))
    }

    /// Build an identifier from a path relative to a root
    pub fn from_relative_path(path: &Path) -> Result<Self, InvalidDirectoryId> {
        let mut segments = Vec::new();

        for component in path.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| InvalidDirectoryId::NotUtf8(path.display().to_string()))?;
                    segments.push(part);
                }
                Component::ParentDir => {
                    return Err(InvalidDirectoryId::ParentReference(
                        path.display().to_string(),
                    ))
                }
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            }
        }

        Self::new(segments.join("/"))
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, outermost first
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Resolve this id under a root directory
    pub fn under(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |path, s| path.join(s))
    }

    /// True if `other` lies strictly below this directory
    pub fn is_ancestor_of(&self, other: &DirectoryId) -> bool {
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == b'/'
    }
}

impl fmt::Display for DirectoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DirectoryId {
    type Err = InvalidDirectoryId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DirectoryId {
    type Error = InvalidDirectoryId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// Ordering and hashing come from the inner string, so lookups by `&str` agree
impl Borrow<str> for DirectoryId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<DirectoryId> for String {
    fn from(id: DirectoryId) -> Self {
        id.0
    }
}
