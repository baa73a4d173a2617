//! Configuration for screensaver.
//!
//! Configuration sources (highest priority first):
//! 1. Command line flags (--input-path, --output-path, --port, --budget)
//! 2. Environment variables (SCREENSAVER_INPUT_PATH, SCREENSAVER_OUTPUT_PATH,
//!    SCREENSAVER_RSYNC_PORT, SCREENSAVER_LIBRARY_BUDGET)
//! 3. Config file (.screensaver/config.yaml)
//! 4. Defaults (~/.screensaver, 15 GiB library)
//!
//! Config file discovery:
//! - An explicit --config / SCREENSAVER_CONFIG path wins
//! - Otherwise searches current directory and parents for .screensaver/config.yaml
//! - Otherwise <user config dir>/screensaver/config.yaml
//! - Paths in a project config file are relative to the directory holding .screensaver/

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::adapters::{LocalTransfer, RsyncTransfer, Transfer};
use crate::core::{EngineConfig, DEFAULT_MAX_ATTEMPTS};

pub const ENV_INPUT_PATH: &str = "SCREENSAVER_INPUT_PATH";
pub const ENV_OUTPUT_PATH: &str = "SCREENSAVER_OUTPUT_PATH";
pub const ENV_RSYNC_PORT: &str = "SCREENSAVER_RSYNC_PORT";
pub const ENV_LIBRARY_BUDGET: &str = "SCREENSAVER_LIBRARY_BUDGET";
pub const ENV_CONFIG: &str = "SCREENSAVER_CONFIG";

/// Three quarters of a 20 GB card
pub const DEFAULT_BUDGET_BYTES: u64 = 15 * 1024 * 1024 * 1024;

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub permissions: PermissionsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteConfig {
    /// Remote root, e.g. `nas:/volume1/photo`
    pub root: Option<String>,
    pub port: Option<u16>,
    /// rsync binary (default: "rsync")
    pub rsync: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub transport: Option<TransportKind>,
}

/// How the remote root is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// rsync over ssh
    #[default]
    Rsync,
    /// Locally mounted directory
    Local,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Output directory (relative to the project root)
    pub output: Option<String>,
    /// Working set, if not `<output>/photos`
    pub working: Option<String>,
    /// Library, if not `<output>/library`
    pub library: Option<String>,
}

/// Byte count or human size ("15GiB")
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ByteBudget {
    Bytes(u64),
    Text(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryConfig {
    pub budget: Option<ByteBudget>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectionConfig {
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogConfig {
    /// Extra non-content directory names (glob patterns)
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionsConfig {
    /// Octal mode for created directories, e.g. "775"
    pub dir_mode: Option<String>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub input_path: Option<String>,
    pub output_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub budget: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub remote_root: Option<String>,
    pub transport: TransportKind,
    pub port: Option<u16>,
    pub rsync_binary: String,
    pub timeout_seconds: u64,
    pub output: PathBuf,
    pub working: PathBuf,
    pub library: PathBuf,
    pub budget_bytes: u64,
    pub max_attempts: u32,
    pub exclude: Vec<String>,
    pub dir_mode: Option<u32>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    pub fn history_file(&self) -> PathBuf {
        paths::history_file(&self.output)
    }

    pub fn lock_file(&self) -> PathBuf {
        paths::lock_file(&self.output)
    }

    /// Engine settings for one cycle
    pub fn engine_config(&self, local_only: bool) -> EngineConfig {
        EngineConfig {
            remote_root: self.remote_root.clone(),
            working_dir: self.working.clone(),
            library_dir: self.library.clone(),
            history_path: self.history_file(),
            lock_path: self.lock_file(),
            budget_bytes: self.budget_bytes,
            max_attempts: self.max_attempts,
            exclude: self.exclude.clone(),
            dir_mode: self.dir_mode,
            local_only,
        }
    }

    /// The transfer implementation for the configured transport
    pub fn transfer(&self) -> Box<dyn Transfer> {
        match self.transport {
            TransportKind::Rsync => Box::new(
                RsyncTransfer::new(self.port, Duration::from_secs(self.timeout_seconds))
                    .with_binary_path(&self.rsync_binary),
            ),
            TransportKind::Local => Box::new(LocalTransfer::new()),
        }
    }
}

/// Find a project config file by searching `start` and its parents
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(paths::PROJECT_CONFIG);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    paths::user_config_file().filter(|p| p.exists())
}

/// Load and parse config file
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Directory that relative paths in a config file are resolved against
fn config_base_dir(config_path: &Path) -> PathBuf {
    let parent = config_path.parent().unwrap_or(Path::new("."));
    if parent.file_name().map(|n| n == ".screensaver").unwrap_or(false) {
        parent.parent().unwrap_or(Path::new(".")).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Parse a byte budget: plain bytes or a human size ("15GiB", "500 MB")
pub fn parse_budget(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if let Ok(bytes) = raw.parse::<u64>() {
        return Ok(bytes);
    }
    raw.parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| anyhow!("Invalid byte budget {:?}: {}", raw, e))
}

/// Parse an octal permission mode ("775", "0o755")
pub fn parse_mode(raw: &str) -> Result<u32> {
    let digits = raw.trim().trim_start_matches("0o");
    let mode = u32::from_str_radix(digits, 8)
        .with_context(|| format!("Invalid permission mode {:?}", raw))?;
    if mode > 0o7777 {
        bail!("Invalid permission mode {:?}", raw);
    }
    Ok(mode)
}

/// Merge the layers into a resolved configuration.
///
/// `env` looks up environment variables; the binary passes `std::env::var`.
pub fn resolve(
    file: Option<(&Path, &ConfigFile)>,
    env: &dyn Fn(&str) -> Option<String>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let empty = ConfigFile::default();
    let (config_file, config) = match file {
        Some((path, config)) => (Some(path.to_path_buf()), config),
        None => (None, &empty),
    };
    let base = config_file
        .as_deref()
        .map(config_base_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    let remote_root = overrides
        .input_path
        .clone()
        .or_else(|| env(ENV_INPUT_PATH))
        .or_else(|| config.remote.root.clone())
        .filter(|root| !root.trim().is_empty());

    let output = match overrides
        .output_path
        .clone()
        .or_else(|| env(ENV_OUTPUT_PATH).map(PathBuf::from))
    {
        Some(path) => path,
        None => match &config.paths.output {
            Some(path) => resolve_path(&base, path),
            None => paths::default_output().context("Failed to determine home directory")?,
        },
    };

    let working = match &config.paths.working {
        Some(path) => resolve_path(&base, path),
        None => paths::working_dir(&output),
    };
    let library = match &config.paths.library {
        Some(path) => resolve_path(&base, path),
        None => paths::library_dir(&output),
    };

    let port = match overrides.port {
        Some(port) => Some(port),
        None => match env(ENV_RSYNC_PORT) {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .with_context(|| format!("Invalid {}: {:?}", ENV_RSYNC_PORT, raw))?,
            ),
            None => config.remote.port,
        },
    };

    let budget_bytes = match overrides
        .budget
        .clone()
        .or_else(|| env(ENV_LIBRARY_BUDGET))
    {
        Some(raw) => parse_budget(&raw)?,
        None => match &config.library.budget {
            Some(ByteBudget::Bytes(bytes)) => *bytes,
            Some(ByteBudget::Text(raw)) => parse_budget(raw)?,
            None => DEFAULT_BUDGET_BYTES,
        },
    };

    let max_attempts = config.selection.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
    if max_attempts == 0 {
        bail!("selection.max_attempts must be at least 1");
    }

    let dir_mode = config
        .permissions
        .dir_mode
        .as_deref()
        .map(parse_mode)
        .transpose()?;

    Ok(ResolvedConfig {
        remote_root,
        transport: config.remote.transport.unwrap_or_default(),
        port,
        rsync_binary: config
            .remote
            .rsync
            .clone()
            .unwrap_or_else(|| "rsync".to_string()),
        timeout_seconds: config
            .remote
            .timeout_seconds
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        output,
        working,
        library,
        budget_bytes,
        max_attempts,
        exclude: config.catalog.exclude.clone(),
        dir_mode,
        config_file,
    })
}

/// Load configuration from all sources
pub fn load(overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let config_path = match &overrides.config_file {
        Some(path) => Some(path.clone()),
        None => {
            let cwd = std::env::current_dir().context("Failed to determine current directory")?;
            find_config_file(&cwd)
        }
    };

    let file = config_path
        .as_deref()
        .map(|path| load_config_file(path).map(|config| (path, config)))
        .transpose()?;

    resolve(
        file.as_ref().map(|(path, config)| (*path, config)),
        &|key| std::env::var(key).ok(),
        overrides,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults_without_file() {
        let overrides = ConfigOverrides {
            output_path: Some(PathBuf::from("/data/frame")),
            ..Default::default()
        };
        let config = resolve(None, &no_env, &overrides).unwrap();

        assert_eq!(config.remote_root, None);
        assert_eq!(config.working, PathBuf::from("/data/frame/photos"));
        assert_eq!(config.library, PathBuf::from("/data/frame/library"));
        assert_eq!(config.budget_bytes, DEFAULT_BUDGET_BYTES);
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.transport, TransportKind::Rsync);
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".screensaver");
        std::fs::create_dir_all(&dir).unwrap();

        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1"
remote:
  root: "nas:/volume1/photo"
  port: 2222
  timeout_seconds: 60
paths:
  output: ./frame
library:
  budget: 2GiB
selection:
  max_attempts: 3
catalog:
  exclude: [".thumbnails"]
permissions:
  dir_mode: "775"
"#
        )
        .unwrap();

        let parsed = load_config_file(&config_path).unwrap();
        assert_eq!(parsed.remote.port, Some(2222));
        assert_eq!(parsed.library.budget, Some(ByteBudget::Text("2GiB".to_string())));

        let file = Some((config_path.as_path(), &parsed));
        let config = resolve(file, &no_env, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.remote_root.as_deref(), Some("nas:/volume1/photo"));
        assert_eq!(config.port, Some(2222));
        assert_eq!(config.timeout_seconds, 60);
        assert_eq!(config.output, temp.path().join("frame"));
        assert_eq!(config.budget_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.exclude, vec![".thumbnails".to_string()]);
        assert_eq!(config.dir_mode, Some(0o775));
    }

    #[test]
    fn test_env_beats_file_and_flags_beat_env() {
        let file = ConfigFile {
            remote: RemoteConfig {
                root: Some("nas:/file".to_string()),
                port: Some(22),
                ..Default::default()
            },
            library: LibraryConfig {
                budget: Some(ByteBudget::Bytes(1_000)),
            },
            ..Default::default()
        };
        let env: HashMap<&str, &str> = [
            (ENV_INPUT_PATH, "nas:/env"),
            (ENV_OUTPUT_PATH, "/env/out"),
            (ENV_RSYNC_PORT, "2200"),
            (ENV_LIBRARY_BUDGET, "2000"),
        ]
        .into_iter()
        .collect();
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());
        let path = PathBuf::from("/etc/screensaver/config.yaml");

        let config =
            resolve(Some((path.as_path(), &file)), &lookup, &ConfigOverrides::default()).unwrap();
        assert_eq!(config.remote_root.as_deref(), Some("nas:/env"));
        assert_eq!(config.output, PathBuf::from("/env/out"));
        assert_eq!(config.port, Some(2200));
        assert_eq!(config.budget_bytes, 2000);

        let overrides = ConfigOverrides {
            input_path: Some("nas:/flag".to_string()),
            port: Some(2300),
            budget: Some("3000".to_string()),
            ..Default::default()
        };
        let config = resolve(Some((path.as_path(), &file)), &lookup, &overrides).unwrap();
        assert_eq!(config.remote_root.as_deref(), Some("nas:/flag"));
        assert_eq!(config.port, Some(2300));
        assert_eq!(config.budget_bytes, 3000);
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let lookup = |key: &str| (key == ENV_RSYNC_PORT).then(|| "ssh".to_string());
        let overrides = ConfigOverrides {
            output_path: Some(PathBuf::from("/out")),
            ..Default::default()
        };
        assert!(resolve(None, &lookup, &overrides).is_err());
    }

    #[test]
    fn test_parse_budget() {
        assert_eq!(parse_budget("1024").unwrap(), 1024);
        assert_eq!(parse_budget("15GiB").unwrap(), DEFAULT_BUDGET_BYTES);
        assert_eq!(parse_budget("500 MB").unwrap(), 500_000_000);
        assert!(parse_budget("lots").is_err());
    }

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("775").unwrap(), 0o775);
        assert_eq!(parse_mode("0o755").unwrap(), 0o755);
        assert!(parse_mode("9").is_err());
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(".screensaver");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.yaml"), "version: \"1\"\n").unwrap();
        let nested = temp.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(dir.join("config.yaml")));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }

    #[test]
    fn test_local_transport() {
        let file = ConfigFile {
            remote: RemoteConfig {
                root: Some("/mnt/nas/photo".to_string()),
                transport: Some(TransportKind::Local),
                ..Default::default()
            },
            ..Default::default()
        };
        let path = PathBuf::from("/etc/screensaver/config.yaml");
        let overrides = ConfigOverrides {
            output_path: Some(PathBuf::from("/out")),
            ..Default::default()
        };
        let config = resolve(Some((path.as_path(), &file)), &no_env, &overrides).unwrap();
        assert_eq!(config.transfer().name(), "local");

        let engine = config.engine_config(true);
        assert!(engine.local_only);
        assert_eq!(engine.history_path, PathBuf::from("/out/already_used.json"));
    }
}
