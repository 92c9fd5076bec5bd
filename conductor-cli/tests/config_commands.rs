use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use predicates::str::contains;

const VALID: &str = r#"
scheduler:
  tick_secs: 15
targets:
  - platform: hubspot
    data_type: contacts
    priority: high
    interval_secs: 300
    connector: {command: /bin/true}
  - platform: hubspot
    data_type: deals
    priority: medium
    interval_secs: 600
    depends_on: ["hubspot/contacts"]
    connector: {command: /bin/true}
  - platform: gong
    data_type: calls
    priority: real_time
    interval_secs: 60
    connector: {command: /bin/true}
"#;

fn conductor_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("conductor"));
    cmd.env("HOME", home).env("USERPROFILE", home);
    cmd
}

#[test]
fn validate_reports_a_good_config() {
    let home = TempDir::new().expect("home");
    let config = home.child(".conductor/targets.yaml");
    config.write_str(VALID).expect("write config");

    conductor_cmd(home.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(contains("3 targets, 1 with dependencies, tick every 15s"));
}

#[test]
fn validate_accepts_an_explicit_path() {
    let home = TempDir::new().expect("home");
    let config = home.child("elsewhere.yaml");
    config.write_str(VALID).expect("write config");

    conductor_cmd(home.path())
        .args(["validate", "--config"])
        .arg(config.path())
        .assert()
        .success()
        .stdout(contains("elsewhere.yaml"));
}

#[test]
fn validate_rejects_unknown_dependencies() {
    let home = TempDir::new().expect("home");
    let config = home.child(".conductor/targets.yaml");
    config
        .write_str(
            "targets:\n  - {platform: a, data_type: x, priority: high, interval_secs: 60, depends_on: [b/y], connector: {command: /bin/true}}\n",
        )
        .expect("write config");

    conductor_cmd(home.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("b/y"));
}

#[test]
fn validate_requires_a_connector_per_target() {
    let home = TempDir::new().expect("home");
    home.child(".conductor/targets.yaml")
        .write_str("targets:\n  - {platform: a, data_type: x, priority: low, interval_secs: 60}\n")
        .expect("write config");

    conductor_cmd(home.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("no connector command configured"));
}

#[test]
fn missing_config_is_reported() {
    let home = TempDir::new().expect("home");

    conductor_cmd(home.path())
        .arg("validate")
        .assert()
        .failure()
        .stderr(contains("targets.yaml"));
}

#[test]
fn targets_lists_in_tier_order() {
    let home = TempDir::new().expect("home");
    home.child(".conductor/targets.yaml")
        .write_str(VALID)
        .expect("write config");

    let output = conductor_cmd(home.path())
        .args(["targets", "--json"])
        .output()
        .expect("run targets");
    assert!(output.status.success());

    let targets: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    let keys: Vec<&str> = targets
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|t| t["key"].as_str())
        .collect();
    assert_eq!(keys, ["gong/calls", "hubspot/contacts", "hubspot/deals"]);
    assert_eq!(targets[2]["depends_on"][0], "hubspot/contacts");
    assert_eq!(targets[0]["priority"], "real_time");
}

#[test]
fn targets_table_shows_dependencies() {
    let home = TempDir::new().expect("home");
    home.child(".conductor/targets.yaml")
        .write_str(VALID)
        .expect("write config");

    conductor_cmd(home.path())
        .arg("targets")
        .assert()
        .success()
        .stdout(contains("hubspot/deals").and(contains("depends on")));
}

#[test]
fn malformed_sync_target_is_a_usage_error() {
    let home = TempDir::new().expect("home");

    conductor_cmd(home.path())
        .args(["sync", "hubspot"])
        .assert()
        .failure()
        .stderr(contains("hubspot"));
}

#[test]
fn status_without_a_daemon_fails_cleanly() {
    let home = TempDir::new().expect("home");

    conductor_cmd(home.path())
        .arg("status")
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");

    conductor_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains(r#""running": false"#));
}
