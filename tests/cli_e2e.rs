//! End-to-end CLI tests for the bulk-downloader binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Builds a command whose config and state live inside `dir`.
fn isolated(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("bulk-downloader").unwrap();
    cmd.env("XDG_CONFIG_HOME", dir.path())
        .env("XDG_DATA_HOME", dir.path())
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(dir.path().join("state.db"));
    cmd
}

// ==================== Arguments ====================

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("bulk-downloader").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bulk file download manager"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("bulk-downloader").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bulk-downloader"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    let mut cmd = Command::cargo_bin("bulk-downloader").unwrap();
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("bulk-downloader").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

// ==================== Commands ====================

#[test]
fn test_status_on_fresh_database_reports_nothing() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("no downloads"));
    assert!(dir.path().join("state.db").exists());
}

#[test]
fn test_status_json_is_an_empty_list() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .args(["-q", "status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_prefs_updates_concurrency() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .args(["-q", "prefs", "--concurrent-downloads", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"concurrentDownloads\": 3"));

    // Persisted across invocations.
    isolated(&dir)
        .args(["-q", "prefs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"concurrentDownloads\": 3"));
}

#[test]
fn test_prefs_rejects_zero_concurrency() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .args(["prefs", "--concurrent-downloads", "0"])
        .assert()
        .failure();
}

#[test]
fn test_config_file_concurrency_overrides_preferences() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "concurrent_downloads = 7\n").unwrap();

    isolated(&dir)
        .arg("--config")
        .arg(&config)
        .args(["-q", "prefs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"concurrentDownloads\": 7"));
}

#[test]
fn test_cancel_unknown_download_fails() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .args(["-q", "cancel", "missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_undo_unknown_marker_fails() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .args(["-q", "undo", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown undo marker"));
}
