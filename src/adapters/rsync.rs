//! rsync transfer over ssh.
//!
//! Every operation spawns `rsync` as a subprocess, bounded by a timeout and a
//! cancellation token. Failures are classified from rsync/ssh stderr.

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{DirectoryListing, Transfer, TransferError, TransferOutput, TransferRequest};
use crate::library::catalog::is_listing_artifact;

/// rsync exit codes that still produce a usable listing (partial transfer, vanished files)
const PARTIAL_EXIT_CODES: &[i32] = &[23, 24];

/// rsync transfer using subprocess mode
pub struct RsyncTransfer {
    /// Path to the rsync binary (default: "rsync")
    binary_path: String,

    /// ssh port for the remote shell, if not the default
    port: Option<u16>,

    /// Upper bound for any single rsync invocation
    timeout: Duration,
}

impl RsyncTransfer {
    /// Create an rsync transfer
    pub fn new(port: Option<u16>, timeout: Duration) -> Self {
        Self {
            binary_path: "rsync".to_string(),
            port,
            timeout,
        }
    }

    /// Use a custom rsync binary
    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    fn remote_shell_args(&self) -> Vec<String> {
        match self.port {
            Some(port) => vec!["--rsh".to_string(), format!("ssh -p{}", port)],
            None => Vec::new(),
        }
    }

    /// Dry run that only matches directories.
    ///
    /// Without `-a` rsync does not descend, which makes a cheap reachability
    /// probe; with it the output lists every directory below the root.
    /// `-8` keeps non-ASCII names unescaped whatever the locale.
    fn dry_run_args(&self, recursive: bool, root: &str, destination: &str) -> Vec<String> {
        let mut args = vec!["-vn".to_string(), "-8".to_string()];
        if recursive {
            args.push("-a".to_string());
        }
        args.extend(self.remote_shell_args());
        args.extend(
            ["--include", "*/", "--exclude", "*"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(with_trailing_slash(root));
        args.push(destination.to_string());
        args
    }

    /// Checksum-based mirror of the matching files of one directory
    fn transfer_args(&self, request: &TransferRequest) -> Vec<String> {
        let mut args: Vec<String> = ["-v", "-8", "-r", "-s", "-c", "--delete"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.remote_shell_args());
        for pattern in &request.filter.include {
            args.push("--include".to_string());
            args.push(pattern.clone());
        }
        args.push("--exclude".to_string());
        args.push("*".to_string());
        args.push(with_trailing_slash(&request.source));
        args.push(with_trailing_slash(&request.destination.to_string_lossy()));
        args
    }

    /// Run rsync, racing the timeout and the cancellation token
    async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<Output, TransferError> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        debug!(binary = %self.binary_path, ?args, "spawning rsync");

        let child = Command::new(&self.binary_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransferError::Other(format!("Failed to spawn {}: {}", self.binary_path, e))
            })?;

        tokio::select! {
            _ = cancel.cancelled() => Err(TransferError::Cancelled),
            result = timeout(self.timeout, child.wait_with_output()) => match result {
                Err(_) => Err(TransferError::TimedOut(self.timeout)),
                Ok(Err(e)) => Err(TransferError::Other(format!(
                    "Failed to wait for {}: {}",
                    self.binary_path, e
                ))),
                Ok(Ok(output)) => Ok(output),
            },
        }
    }
}

#[async_trait]
impl Transfer for RsyncTransfer {
    fn name(&self) -> &str {
        "rsync"
    }

    #[instrument(skip(self, cancel))]
    async fn probe(&self, root: &str, cancel: &CancellationToken) -> Result<(), TransferError> {
        let scratch = tempfile::tempdir()
            .map_err(|e| TransferError::Other(format!("Failed to create scratch dir: {}", e)))?;
        let args = self.dry_run_args(false, root, &scratch.path().to_string_lossy());
        let output = self.run(&args, cancel).await?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(&stderr, output.status.code().unwrap_or(-1)))
    }

    #[instrument(skip(self, cancel))]
    async fn list_directories(
        &self,
        root: &str,
        cancel: &CancellationToken,
    ) -> Result<DirectoryListing, TransferError> {
        // Dry run: nothing is written, but rsync still wants a local destination
        let scratch = tempfile::tempdir()
            .map_err(|e| TransferError::Other(format!("Failed to create scratch dir: {}", e)))?;
        let args = self.dry_run_args(true, root, &scratch.path().to_string_lossy());
        let output = self.run(&args, cancel).await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            if PARTIAL_EXIT_CODES.contains(&code) {
                warn!(
                    code,
                    stderr = %stderr.trim(),
                    "rsync listing incomplete, using partial result"
                );
            } else {
                return Err(classify_failure(&stderr, code));
            }
        }

        // Directory names are not guaranteed to be UTF-8
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(DirectoryListing {
            lines: stdout.lines().map(str::to_string).collect(),
        })
    }

    #[instrument(skip(self, request, cancel), fields(source = %request.source))]
    async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> Result<TransferOutput, TransferError> {
        let args = self.transfer_args(request);
        let output = self.run(&args, cancel).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr, output.status.code().unwrap_or(-1)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let files = parse_transferred(&stdout);
        debug!(files = files.len(), "rsync transfer complete");

        Ok(TransferOutput { files })
    }
}

/// Map rsync/ssh stderr to a transfer error
pub fn classify_failure(stderr: &str, exit_code: i32) -> TransferError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    if [
        "could not resolve hostname",
        "name or service not known",
        "no route to host",
        "connection refused",
        "network is unreachable",
        "connection timed out",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
        || (lower.contains("change_dir") && lower.contains("failed"))
    {
        TransferError::Unreachable(message)
    } else if lower.contains("permission denied") {
        TransferError::PermissionDenied(message)
    } else if [
        "connection closed by",
        "connection unexpectedly closed",
        "connection reset",
        "broken pipe",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
    {
        TransferError::ConnectionReset(message)
    } else {
        TransferError::Other(format!("rsync exited with code {}: {}", exit_code, message))
    }
}

/// File names from `rsync -v` output (directories and summary lines dropped)
pub fn parse_transferred(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.ends_with('/'))
        .filter(|line| !is_listing_artifact(line))
        .filter(|line| !line.starts_with("deleting "))
        .map(str::to_string)
        .collect()
}

fn with_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FilterSpec;
    use std::path::PathBuf;

    #[test]
    fn test_listing_args_with_port() {
        let rsync = RsyncTransfer::new(Some(2222), Duration::from_secs(5));
        let args = rsync.dry_run_args(true, "nas:/photo", "/tmp/scratch");
        assert_eq!(
            args,
            vec![
                "-vn", "-8", "-a", "--rsh", "ssh -p2222", "--include", "*/", "--exclude",
                "*", "nas:/photo/", "/tmp/scratch",
            ]
        );
    }

    #[test]
    fn test_probe_args_are_not_recursive() {
        let rsync = RsyncTransfer::new(Some(22), Duration::from_secs(5));
        let args = rsync.dry_run_args(false, "nas:/photo/", ".");
        assert!(!args.contains(&"-a".to_string()));
        assert!(!args.contains(&"-r".to_string()));
        assert_eq!(&args[..2], ["-vn", "-8"]);
    }

    #[test]
    fn test_transfer_args_without_port() {
        let rsync = RsyncTransfer::new(None, Duration::from_secs(5));
        let request = TransferRequest {
            source: "nas:/photo/2020/trip".to_string(),
            destination: PathBuf::from("/data/photos"),
            filter: FilterSpec {
                include: vec!["*.[jJ][pP][gG]".to_string()],
            },
        };
        let args = rsync.transfer_args(&request);
        assert_eq!(
            args,
            vec![
                "-v", "-8", "-r", "-s", "-c", "--delete", "--include", "*.[jJ][pP][gG]",
                "--exclude", "*", "nas:/photo/2020/trip/", "/data/photos/",
            ]
        );
        assert!(!args.contains(&"--rsh".to_string()));
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure("ssh: Could not resolve hostname nas: Name or service not known", 255),
            TransferError::Unreachable(_)
        ));
        assert!(matches!(
            classify_failure("user@nas: Permission denied (publickey,password).", 255),
            TransferError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify_failure("Connection closed by 192.168.1.2 port 22", 255),
            TransferError::ConnectionReset(_)
        ));
        assert!(matches!(
            classify_failure("rsync: connection unexpectedly closed (0 bytes received so far)", 12),
            TransferError::ConnectionReset(_)
        ));
        assert!(matches!(
            classify_failure("rsync: write failed: No space left on device (28)", 11),
            TransferError::Other(_)
        ));
    }

    #[test]
    fn test_parse_transferred() {
        let stdout = "\
receiving incremental file list
./
IMG_0001.JPG
IMG_0002.jpg
deleting old.jpg

sent 1,024 bytes  received 2,048 bytes  6,144.00 bytes/sec
total size is 4,096  speedup is 1.33
";
        assert_eq!(parse_transferred(stdout), vec!["IMG_0001.JPG", "IMG_0002.jpg"]);
    }

    #[test]
    fn test_parse_transferred_keeps_non_ascii_names() {
        let stdout = "receiving incremental file list\nPlaya Señora.JPG\n";
        assert_eq!(parse_transferred(stdout), vec!["Playa Señora.JPG"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let rsync = RsyncTransfer::new(None, Duration::from_secs(5))
            .with_binary_path("/nonexistent/rsync");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = rsync.probe("nas:/photo", &cancel).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
    }

    /// Stand-in rsync that hangs until killed
    #[cfg(unix)]
    fn hanging_rsync(dir: &tempfile::TempDir) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("rsync");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 5\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_rsync_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let rsync = RsyncTransfer::new(None, Duration::from_millis(200))
            .with_binary_path(hanging_rsync(&dir));

        let started = std::time::Instant::now();
        let result = rsync.list_directories("nas:/photo", &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(TransferError::TimedOut(d)) if d == Duration::from_millis(200)
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_interrupts_running_rsync() {
        let dir = tempfile::tempdir().unwrap();
        let rsync = RsyncTransfer::new(None, Duration::from_secs(30))
            .with_binary_path(hanging_rsync(&dir));
        let request = TransferRequest {
            source: "nas:/photo/2020/trip".to_string(),
            destination: dir.path().join("dest"),
            filter: FilterSpec::media(),
        };

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = rsync.transfer(&request, &cancel).await;
        assert!(matches!(result, Err(TransferError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_binary_is_other() {
        let rsync = RsyncTransfer::new(None, Duration::from_secs(5))
            .with_binary_path("/nonexistent/rsync");
        let result = rsync.probe("nas:/photo", &CancellationToken::new()).await;
        assert!(matches!(result, Err(TransferError::Other(_))));
    }
}
