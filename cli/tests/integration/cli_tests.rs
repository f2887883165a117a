//! End-to-end tests of the `testbay` binary.

#![allow(clippy::expect_used)]

use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const CONFIG: &str = r"
devices:
  - null:sim-1
  - null:sim-2
tick_interval_ms: 10
acquire:
  attempts: 1
  backoff_secs: 0
tests:
  smoke:
    platform: 'null'
    max_duration_secs: 30
    roles:
      - role: server
      - role: client
  crowd:
    platform: 'null'
    roles:
      - role: client
        count: 3
";

fn testbay() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("testbay"));
    cmd.env("NO_COLOR", "1")
        .env_remove("TESTBAY_DEVICES")
        .env_remove("TESTBAY_CONFIG");
    cmd
}

/// Write the sample config into a fresh directory.
fn config_dir() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("testbay.yaml");
    std::fs::write(&path, CONFIG).expect("write config");
    (dir, path)
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

// --- Help and version ---

#[test]
fn test_no_args_shows_help_and_exits_two() {
    testbay().assert().code(2).stderr(predicate::str::contains(
        "Reserve devices and run multi-role tests",
    ));
}

#[test]
fn test_help_lists_commands() {
    testbay()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains("devices"));
}

#[test]
fn test_version_command() {
    testbay()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("testbay 0.1.0"));
}

#[test]
fn test_version_json() {
    testbay()
        .args(["version", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""version": "0.1.0""#));
}

// --- run ---

#[test]
fn test_run_requires_testname() {
    let (_dir, config) = config_dir();
    testbay()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--testname"));
}

#[test]
fn test_run_unknown_test_is_a_configuration_error() {
    let (_dir, config) = config_dir();
    testbay()
        .arg("--config")
        .arg(&config)
        .args(["run", "--testname", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("smoke"));
}

#[test]
fn test_run_on_null_devices_passes() {
    let (dir, config) = config_dir();
    let output = testbay()
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .args(["run", "--testname", "smoke", "--tempdir"])
        .arg(dir.path())
        .output()
        .expect("run testbay");

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let json = stdout_json(&output);
    assert_eq!(json["exit_code"], 0);
    assert_eq!(json["results"][0]["test"], "smoke");
    assert_eq!(json["results"][0]["outcome"]["status"], "passed");
    assert_eq!(json["results"][0]["roles"].as_array().map(Vec::len), Some(2));
}

#[test]
fn test_run_without_enough_devices_exits_three() {
    let (dir, config) = config_dir();
    let output = testbay()
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .args(["run", "--testname", "crowd", "--tempdir"])
        .arg(dir.path())
        .output()
        .expect("run testbay");

    assert_eq!(output.status.code(), Some(3), "{output:?}");
    let json = stdout_json(&output);
    assert_eq!(json["results"][0]["outcome"]["reason"], "insufficient_devices");
}

#[test]
fn test_legacy_single_dash_options_are_accepted() {
    let (dir, config) = config_dir();
    testbay()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("-testname=smoke")
        .arg(format!("-tempdir={}", dir.path().display()))
        .assert()
        .success();
}

#[test]
fn test_devices_flag_overrides_config() {
    let (dir, config) = config_dir();
    testbay()
        .arg("--config")
        .arg(&config)
        .args(["run", "--testname", "smoke", "--devices", "null:only"])
        .arg("--tempdir")
        .arg(dir.path())
        .assert()
        .code(3);
}

// --- clean ---

#[test]
fn test_clean_dry_run_json() {
    let (dir, config) = config_dir();
    let output = testbay()
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .args(["clean", "--dry-run", "--maxdays", "1", "--tempdir"])
        .arg(dir.path())
        .output()
        .expect("run testbay");

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let json = stdout_json(&output);
    assert_eq!(json["dry_run"], true);
    assert_eq!(json["devices"].as_array().map(Vec::len), Some(2));
    assert_eq!(json["devices"][0]["status"]["status"], "swept");
}

// --- devices ---

#[test]
fn test_devices_json_lists_the_seed() {
    let (dir, config) = config_dir();
    let output = testbay()
        .arg("--config")
        .arg(&config)
        .arg("--json")
        .args(["devices", "--tempdir"])
        .arg(dir.path())
        .output()
        .expect("run testbay");

    assert_eq!(output.status.code(), Some(0), "{output:?}");
    let json = stdout_json(&output);
    let devices = json["devices"].as_array().expect("devices array");
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0]["name"], "sim-1");
    assert_eq!(devices[0]["platform"], "null");
    assert_eq!(devices[0]["reserved"], false);
}

#[test]
fn test_invalid_device_entry_fails() {
    let (dir, config) = config_dir();
    testbay()
        .arg("--config")
        .arg(&config)
        .args(["devices", "--devices", "android:", "--tempdir"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid device seed"));
}
