//! End-to-end CLI tests for the hlsgrab binary.
//!
//! Every invocation points `XDG_CONFIG_HOME` at a private directory so a
//! developer's own config file cannot change the results.

use std::process::Output;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

mod support;
use support::hls::{entries, mount_status, mount_stream, stream_bytes};
use support::socket_guard::start_mock_server_or_skip;

fn hlsgrab(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hlsgrab").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

/// Runs the binary off the async runtime so the mock server keeps serving.
async fn run(config_home: &TempDir, args: Vec<String>) -> Output {
    let mut cmd = hlsgrab(config_home);
    cmd.args(args).write_stdin("");
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

#[test]
fn test_binary_help_displays_usage() {
    let config = TempDir::new().unwrap();
    hlsgrab(&config)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download HLS streams"))
        .stdout(predicate::str::contains("--concurrency"));
}

#[test]
fn test_binary_version_displays_version() {
    let config = TempDir::new().unwrap();
    hlsgrab(&config)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("hlsgrab"));
}

#[test]
fn test_binary_without_input_exits_zero() {
    let config = TempDir::new().unwrap();
    hlsgrab(&config).write_stdin("").assert().success();
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let config = TempDir::new().unwrap();
    hlsgrab(&config)
        .arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_binary_rejects_invalid_config_file() {
    let config = TempDir::new().unwrap();
    std::fs::create_dir_all(config.path().join("hlsgrab")).unwrap();
    std::fs::write(config.path().join("hlsgrab").join("config.toml"), "concurrency = 0\n").unwrap();

    hlsgrab(&config)
        .arg("https://cdn.example/master.m3u8")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn test_binary_invalid_url_exits_two() {
    let config = TempDir::new().unwrap();
    hlsgrab(&config)
        .arg("not a url")
        .assert()
        .code(2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_complete_download_exits_zero() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_stream(&server, "show", 3, &[]).await;
    let config = TempDir::new().unwrap();
    let workspace_root = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let output = out.path().join("nested").join("show.ts");

    let result = run(
        &config,
        vec![
            format!("{}/show/index.m3u8", server.uri()),
            "-o".to_string(),
            output.display().to_string(),
            "--workspace-root".to_string(),
            workspace_root.path().display().to_string(),
            "-q".to_string(),
        ],
    )
    .await;

    assert_eq!(result.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&result.stderr));
    assert!(String::from_utf8_lossy(&result.stdout).contains("Downloaded 3 segments"));
    assert_eq!(std::fs::read(&output).unwrap(), stream_bytes(0..3));
    assert!(entries(workspace_root.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_segments_exit_one_with_json_report() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_stream(&server, "show", 5, &[1, 3]).await;
    let config = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let output = out.path().join("show.ts");

    let result = run(
        &config,
        vec![
            format!("{}/show/index.m3u8", server.uri()),
            "--output".to_string(),
            output.display().to_string(),
            "--json".to_string(),
            "-q".to_string(),
        ],
    )
    .await;

    assert_eq!(result.status.code(), Some(1));
    let records: serde_json::Value = serde_json::from_slice(&result.stdout).unwrap();
    let record = &records[0];
    assert_eq!(record["status"], "partial_success");
    assert_eq!(record["missing_indices"], serde_json::json!([1, 3]));
    assert_eq!(record["report"]["video"]["segments_written"], 3);
    assert_eq!(std::fs::read(&output).unwrap(), stream_bytes([0, 2, 4]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_job_failing_exits_two() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_status(&server, "/gone/master.m3u8", 404).await;
    let config = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let result = run(
        &config,
        vec![
            format!("{}/gone/master.m3u8", server.uri()),
            "-o".to_string(),
            out.path().join("gone.ts").display().to_string(),
            "-q".to_string(),
        ],
    )
    .await;

    assert_eq!(result.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&result.stderr).contains("fetching the playlist"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_mixed_batch_exits_one_and_names_outputs() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_stream(&server, "first", 2, &[]).await;
    mount_status(&server, "/second/index.m3u8", 500).await;
    let config = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let result = run(
        &config,
        vec![
            format!("{}/first/index.m3u8", server.uri()),
            format!("{}/second/index.m3u8", server.uri()),
            "-o".to_string(),
            out.path().display().to_string(),
            "-q".to_string(),
        ],
    )
    .await;

    assert_eq!(result.status.code(), Some(1));
    assert_eq!(
        std::fs::read(out.path().join("first.ts")).unwrap(),
        stream_bytes(0..2)
    );
    assert!(!out.path().join("second.ts").exists());
}
