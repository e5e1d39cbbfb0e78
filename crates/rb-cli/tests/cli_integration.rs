//! CLI integration tests
//!
//! Tests the remote-bridge CLI using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn remote_bridge() -> Command {
    Command::cargo_bin("remote-bridge")
        .expect("Failed to locate remote-bridge binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    remote_bridge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote-bridge"))
        .stdout(predicate::str::contains("connect"));
}

#[test]
fn test_cli_version() {
    remote_bridge()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("remote-bridge"));
}

#[test]
fn test_cli_connect_help() {
    remote_bridge()
        .args(["connect", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("user@"));
}

#[test]
fn test_cli_connect_missing_target() {
    remote_bridge().arg("connect").assert().failure();
}

#[test]
fn test_cli_status_requires_session() {
    remote_bridge().arg("status").assert().failure();
}

#[test]
fn test_cli_unknown_command() {
    remote_bridge()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_cli_config_path_uses_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bridge.toml");

    remote_bridge()
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("bridge.toml"));
}

#[test]
fn test_cli_config_init_writes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    remote_bridge()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .success();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[ssh]"));
    assert!(content.contains("[gateway]"));
    assert!(content.contains("bind_address"));

    // Second init without --force leaves the file alone
    std::fs::write(&path, "# edited\n").unwrap();
    remote_bridge()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stderr(predicate::str::contains("already exists"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited\n");
}

#[test]
fn test_cli_config_show_without_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");

    remote_bridge()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("launch_timeout"));
}

#[test]
fn test_cli_connect_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[ssh\nport = ").unwrap();

    remote_bridge()
        .args(["connect", "alice@127.0.0.1", "--no-prompt", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
