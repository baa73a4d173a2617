//! CLI Output Integration Tests
//!
//! Runs the built binary and checks what lands on stdout.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn screensaver(config: &Path, output: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_screensaver"))
        .arg("--config")
        .arg(config)
        .arg("--output-path")
        .arg(output)
        .args(args)
        .env_remove("SCREENSAVER_INPUT_PATH")
        .env_remove("SCREENSAVER_OUTPUT_PATH")
        .env_remove("SCREENSAVER_RSYNC_PORT")
        .env_remove("SCREENSAVER_LIBRARY_BUDGET")
        .env("RUST_LOG", "debug")
        .output()
        .unwrap()
}

fn local_archive(temp: &TempDir) -> std::path::PathBuf {
    let archive = temp.path().join("nas");
    fs::create_dir_all(archive.join("2020/trip")).unwrap();
    fs::write(archive.join("2020/trip/a.jpg"), b"jpeg").unwrap();

    let config = temp.path().join("config.yaml");
    fs::write(
        &config,
        format!(
            "version: \"1\"\nremote:\n  root: \"{}\"\n  transport: local\n",
            archive.display()
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_run_json_stdout_is_only_the_report() {
    let temp = TempDir::new().unwrap();
    let config = local_archive(&temp);

    let output = screensaver(&config, &temp.path().join("out"), &["run", "--json"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["selection"], "2020/trip");
    assert_eq!(report["mode"], "remote");

    // Logging still happens, on stderr
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("loaded selection history"));
}

#[test]
fn test_history_json_is_parseable() {
    let temp = TempDir::new().unwrap();
    let config = local_archive(&temp);
    let out = temp.path().join("out");

    assert!(screensaver(&config, &out, &["run"]).status.success());
    let output = screensaver(&config, &out, &["history", "show", "--json"]);
    assert!(output.status.success());

    let record: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(record["random_dir"], "2020/trip");
    assert_eq!(record["already_used"], serde_json::json!(["2020/trip"]));
}

#[test]
fn test_empty_library_without_remote_exits_with_no_content_code() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config.yaml");
    fs::write(&config, "version: \"1\"\n").unwrap();

    let output = screensaver(&config, &temp.path().join("out"), &["run", "--json"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}
