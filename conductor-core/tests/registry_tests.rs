//! Registration validation, config loading and error-message tests.

use assert_fs::prelude::*;
use conductor_core::{config, ConductorConfig, ConfigError, PriorityTier, TargetKey, TargetRegistry};
use predicates::prelude::predicate;
use rstest::rstest;
use std::fs;

const CONFIG: &str = "\
scheduler:
  tick_secs: 15
  worker_pool_size: 2
conflicts:
  timestamp_skew_secs: 120
targets:
  - platform: hubspot
    data_type: contacts
    priority: real_time
    interval_secs: 60
  - platform: hubspot
    data_type: deals
    priority: high
    interval_secs: 300
    retry_budget: 2
    depends_on: [\"hubspot/contacts\"]
    connector:
      command: /usr/local/bin/hubspot-sync
      args: [deals]
  - platform: gong
    data_type: calls
    priority: medium
    interval_secs: 900
    conflict_resolution: false
";

fn key(raw: &str) -> TargetKey {
    raw.parse().expect("target key")
}

fn write_config(home: &assert_fs::TempDir, contents: &str) {
    home.child(".conductor/targets.yaml")
        .write_str(contents)
        .expect("write config");
}

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn load_at_reads_settings_and_targets() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, CONFIG);

    let config = config::load_at(home.path()).expect("load");
    assert_eq!(config.scheduler.tick_secs, 15);
    assert_eq!(config.scheduler.worker_pool_size, 2);
    assert_eq!(config.conflicts.timestamp_skew_secs, 120);
    assert_eq!(config.targets.len(), 3);

    let connector = config.targets[1].connector.as_ref().expect("connector");
    assert_eq!(connector.args, ["deals"]);
    home.child(".conductor/targets.yaml")
        .assert(predicate::path::exists());
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, ": : corrupt : yaml : !!!\n  - broken: [unclosed");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("targets.yaml"), "got: {err}");
}

#[test]
fn load_unknown_priority_is_a_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    write_config(&home, &CONFIG.replace("priority: medium", "priority: urgent"));

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn load_from_explicit_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("custom.yaml");
    fs::write(&path, CONFIG).expect("write");
    let config = config::load_from(&path).expect("load");
    assert_eq!(config.targets.len(), 3);
}

// ---------------------------------------------------------------------------
// 2. Registration
// ---------------------------------------------------------------------------

#[test]
fn build_registry_validates_and_orders_targets() {
    let config: ConductorConfig = serde_yaml::from_str(CONFIG).expect("parse");
    let registry = config.build_registry().expect("registry");

    assert_eq!(registry.len(), 3);
    let deals = registry.get(&key("hubspot/deals")).expect("deals");
    assert_eq!(deals.retry_budget, 2);
    assert_eq!(deals.depends_on, vec![key("hubspot/contacts")]);
    assert!(!registry.get(&key("gong/calls")).expect("calls").conflict_resolution);

    let real_time = registry.targets_by_tier(PriorityTier::RealTime);
    assert_eq!(real_time.len(), 1);
    assert_eq!(real_time[0].key, key("hubspot/contacts"));
}

#[test]
fn duplicate_key_fails_whole_registration() {
    let yaml = format!(
        "{CONFIG}  - platform: gong\n    data_type: calls\n    priority: low\n    interval_secs: 60\n"
    );
    let config: ConductorConfig = serde_yaml::from_str(&yaml).expect("parse");
    let err = config.build_registry().unwrap_err();
    match err {
        ConfigError::DuplicateTarget { key } => assert_eq!(key, "gong/calls"),
        other => panic!("expected duplicate, got {other:?}"),
    }
}

#[test]
fn unknown_dependency_is_rejected() {
    let yaml = CONFIG.replace("[\"hubspot/contacts\"]", "[\"hubspot/companies\"]");
    let config: ConductorConfig = serde_yaml::from_str(&yaml).expect("parse");
    let err = config.build_registry().unwrap_err();
    assert!(
        err.to_string()
            .contains("hubspot/deals depends on unknown target hubspot/companies"),
        "got: {err}"
    );
}

#[rstest]
#[case::two_node(&[("a/x", &["b/y"][..]), ("b/y", &["a/x"][..])], "a/x -> b/y -> a/x")]
#[case::three_node(
    &[("a/x", &[][..]), ("b/y", &["d/w"][..]), ("c/z", &["b/y"][..]), ("d/w", &["c/z"][..])],
    "b/y -> d/w -> c/z -> b/y"
)]
fn cycles_are_named_in_the_error(#[case] edges: &[(&str, &[&str])], #[case] expected: &str) {
    let targets = edges
        .iter()
        .map(|(name, deps)| {
            let (platform, data_type) = name.split_once('/').expect("slash");
            conductor_core::TargetConfig {
                platform: platform.to_string(),
                data_type: data_type.to_string(),
                priority: PriorityTier::Medium,
                interval_secs: 60,
                batch_size: 10,
                retry_budget: 0,
                timeout_secs: 5,
                depends_on: deps.iter().map(|d| d.to_string()).collect(),
                conflict_resolution: true,
                connector: None,
            }
            .to_sync_target()
            .expect("target")
        })
        .collect();

    let err = TargetRegistry::new(targets).unwrap_err();
    match err {
        ConfigError::DependencyCycle { cycle } => assert_eq!(cycle, expected),
        other => panic!("expected cycle, got {other:?}"),
    }
}

#[test]
fn failed_reregistration_keeps_previous_targets() {
    let config: ConductorConfig = serde_yaml::from_str(CONFIG).expect("parse");
    let mut registry = config.build_registry().expect("registry");

    let mut broken = config.sync_targets().expect("targets");
    broken[0].depends_on.push(key("hubspot/deals"));
    assert!(registry.register(broken).is_err());

    assert_eq!(registry.len(), 3);
    assert!(registry
        .get(&key("hubspot/contacts"))
        .expect("contacts")
        .depends_on
        .is_empty());
}

#[test]
fn reregistration_replaces_the_set() {
    let config: ConductorConfig = serde_yaml::from_str(CONFIG).expect("parse");
    let mut registry = config.build_registry().expect("registry");

    let mut targets = config.sync_targets().expect("targets");
    targets.truncate(1);
    registry.register(targets).expect("re-register");
    assert_eq!(registry.len(), 1);
    assert!(!registry.contains(&key("gong/calls")));
}
