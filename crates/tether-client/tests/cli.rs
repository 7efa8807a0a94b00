//! CLI integration tests
//!
//! Tests the tether binary using assert_cmd.

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

fn tether() -> Command {
    Command::cargo_bin("tether")
        .expect("Failed to locate tether binary - ensure it's built before running tests")
}

/// Write a small valid config file and return its path
fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"max_attempts = 1
connect_timeout = 500

[backoff]
initial_delay = 10
max_delay = 20
jitter = 0
"#,
    )
    .expect("Failed to write config");
    path
}

/// Address with nothing listening on it
fn unused_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    format!("ws://{}", addr)
}

#[test]
fn test_cli_help() {
    tether()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tether"))
        .stdout(predicate::str::contains("Resilient WebSocket client"));
}

#[test]
fn test_cli_version() {
    tether()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tether"));
}

#[test]
fn test_cli_requires_url() {
    tether().assert().failure();
}

#[test]
fn test_cli_rejects_invalid_override() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    tether()
        .arg("ws://127.0.0.1:9")
        .arg("--config")
        .arg(&config)
        .args(["--max-attempts", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("max_attempts"));
}

#[test]
fn test_cli_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();

    tether()
        .arg("ws://127.0.0.1:9")
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

#[test]
fn test_cli_exits_cleanly_on_stdin_eof() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(&dir);

    tether()
        .arg(unused_address())
        .arg("--config")
        .arg(&config)
        .write_stdin("hello\n:status\n")
        .timeout(std::time::Duration::from_secs(20))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"queue_length\": 1"));
}
