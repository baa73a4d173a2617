//! Canonical paths below the output directory.
//!
//! Single source of truth - use these instead of joining names by hand.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use screensaver::config::paths;
//!
//! let working = paths::working_dir(&output);
//! let history = paths::history_file(&output);
//! ```
//!
//! | Location | Writer | Purpose |
//! |----------|--------|---------|
//! | `photos/` | engine | Working set read by the display |
//! | `library/` | engine | Size-bounded album cache |
//! | `already_used.json` | engine | Selection history |
//! | `.lock` | engine | Held for the duration of a cycle |

use std::path::{Path, PathBuf};

/// Working set directory name
pub const WORKING_DIR: &str = "photos";

/// Library directory name
pub const LIBRARY_DIR: &str = "library";

/// Persisted history file name
pub const HISTORY_FILE: &str = "already_used.json";

/// Advisory lock file name
pub const LOCK_FILE: &str = ".lock";

/// Per-project config location, searched from the current directory upwards
pub const PROJECT_CONFIG: &str = ".screensaver/config.yaml";

/// Default output directory (~/.screensaver)
pub fn default_output() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".screensaver"))
}

/// User-level config file (<config dir>/screensaver/config.yaml)
pub fn user_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("screensaver").join("config.yaml"))
}

pub fn working_dir(output: &Path) -> PathBuf {
    output.join(WORKING_DIR)
}

pub fn library_dir(output: &Path) -> PathBuf {
    output.join(LIBRARY_DIR)
}

pub fn history_file(output: &Path) -> PathBuf {
    output.join(HISTORY_FILE)
}

pub fn lock_file(output: &Path) -> PathBuf {
    output.join(LOCK_FILE)
}
