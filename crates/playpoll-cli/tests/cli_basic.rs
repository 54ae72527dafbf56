//! Basic CLI E2E tests.
//!
//! Each test runs the built binary with HOME pointed at a fresh temp dir so
//! config and state files never touch the real user directory.

use std::path::Path;
use std::process::Command;

/// Run a CLI command and return (stdout, stderr, exit code).
fn run_cli(home: &Path, args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_playpoll-cli"))
        .args(args)
        .env("HOME", home)
        .env_remove("PLAYPOLL_ENV")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

#[test]
fn test_config_set_then_get() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["config", "set", "save_interval_secs", "30"]);
    assert_eq!(code, 0, "config set failed");

    let (stdout, _, code) = run_cli(home.path(), &["config", "get", "save_interval_secs"]);
    assert_eq!(code, 0);
    assert_eq!(stdout.trim(), "30");
}

#[test]
fn test_config_unknown_key_fails() {
    let home = tempfile::tempdir().unwrap();
    let (_, stderr, code) = run_cli(home.path(), &["config", "get", "no_such_key"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_config_path_is_under_home() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["config", "path"]);
    assert_eq!(code, 0);
    assert!(stdout.trim().ends_with("config.toml"));
    assert!(stdout.contains(home.path().to_str().unwrap()));
}

#[test]
fn test_state_show_without_snapshot() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(home.path(), &["state", "show"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("no state snapshot"));
}

#[test]
fn test_bot_settings_land_in_snapshot() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["bot", "threshold", "5"]);
    assert_eq!(code, 0);
    let (_, _, code) = run_cli(home.path(), &["bot", "ping", "42"]);
    assert_eq!(code, 0);

    let (stdout, _, code) = run_cli(home.path(), &["state", "show", "--json"]);
    assert_eq!(code, 0);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed["config"]["threshold"], 5);
    assert_eq!(parsed["config"]["ping_target"], 42);
    assert_eq!(parsed["polls"].as_array().unwrap().len(), 0);
}

#[test]
fn test_bot_rejects_zero_threshold() {
    let home = tempfile::tempdir().unwrap();
    let (_, _, code) = run_cli(home.path(), &["bot", "threshold", "0"]);
    assert_ne!(code, 0);
}

#[test]
fn test_simulate_success_by_push() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(
        home.path(),
        &["simulate", "--delay", "3", "--required", "2", "--reactors", "2"],
    );
    assert_eq!(code, 0);

    let events: Vec<serde_json::Value> = stdout
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    assert_eq!(events[0]["type"], "Posted");
    assert_eq!(events[0]["message"]["guild_id"], 1);
    let resolved = events
        .iter()
        .find(|e| e["type"] == "Resolved")
        .expect("no Resolved event");
    assert_eq!(resolved["outcome"], "success");
}

#[test]
fn test_simulate_zero_delay_fails_without_reactors() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(
        home.path(),
        &["simulate", "--delay", "0", "--required", "1"],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("\"outcome\":\"failure\""));
}

#[test]
fn test_simulate_huge_delay_is_accepted() {
    let home = tempfile::tempdir().unwrap();
    let (stdout, _, code) = run_cli(
        home.path(),
        &["simulate", "--delay", "9223372036854775807", "--required", "0"],
    );
    assert_eq!(code, 0);
    assert!(stdout.contains("\"outcome\":\"success\""));
}
