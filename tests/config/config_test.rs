//! Tests for config parsing, env overrides and validation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use dapi::cluster::TopologySource;
use dapi::config::{config_dir, load_config, Config, CONFIG_PATH_ENV};

const CLUSTER_TOML: &str = r#"
[node]
name = "master-node"

[cluster]
master = "master-node"

[[cluster.nodes]]
name = "master-node"

[[cluster.nodes]]
name = "worker1"
address = "http://10.0.0.2:55000"

[[cluster.nodes]]
name = "worker2"
address = "http://10.0.0.3:55000"
reachable = false

[router]
request_timeout_secs = 30
max_timeout_secs = 600
"#;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

fn cluster_config() -> Config {
    Config::from_toml(CLUSTER_TOML).expect("cluster config should parse")
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[test]
fn parses_full_cluster_config() {
    let config = cluster_config();
    assert_eq!(config.node.name, "master-node");
    assert_eq!(config.cluster.master.as_deref(), Some("master-node"));
    assert_eq!(config.cluster.nodes.len(), 3);
    assert_eq!(
        config.cluster.nodes[1].address.as_deref(),
        Some("http://10.0.0.2:55000")
    );
    assert!(config.cluster.nodes[1].reachable);
    assert!(!config.cluster.nodes[2].reachable);
    assert_eq!(config.router.request_timeout_secs, 30);
    assert_eq!(config.router.max_timeout_secs, 600);
    assert!(config.validate().is_ok());
}

#[test]
fn empty_toml_yields_defaults() {
    let config = Config::from_toml("").expect("empty config should parse");
    assert_eq!(config, Config::default());
    assert_eq!(config.node.name, "node01");
    assert!(config.validate().is_ok());
}

#[test]
fn malformed_toml_is_rejected() {
    assert!(Config::from_toml("[router]\nrequest_timeout_secs = \"soon\"").is_err());
    assert!(Config::from_toml("not toml at all [").is_err());
}

#[test]
fn router_settings_follow_config() {
    let settings = cluster_config().router.settings();
    assert_eq!(settings.default_timeout, Duration::from_secs(30));
    assert_eq!(settings.max_timeout, Duration::from_secs(600));
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

#[test]
fn env_overrides_take_precedence() {
    let mut config = cluster_config();
    config.apply_overrides(env_from(&[
        ("DAPI_NODE_NAME", "worker1"),
        ("DAPI_MASTER_NODE", "worker2"),
        ("DAPI_REQUEST_TIMEOUT_SECS", "45"),
    ]));
    assert_eq!(config.node.name, "worker1");
    assert_eq!(config.cluster.master.as_deref(), Some("worker2"));
    assert_eq!(config.router.request_timeout_secs, 45);
}

#[test]
fn invalid_env_timeout_is_ignored() {
    let mut config = cluster_config();
    config.apply_overrides(env_from(&[("DAPI_REQUEST_TIMEOUT_SECS", "forever")]));
    assert_eq!(config.router.request_timeout_secs, 30);
}

#[test]
fn config_path_prefers_env_override() {
    let path = Config::config_path_with(env_from(&[(CONFIG_PATH_ENV, "/etc/dapi/config.toml")]))
        .expect("path should resolve");
    assert_eq!(path, PathBuf::from("/etc/dapi/config.toml"));
}

#[test]
fn default_config_dir_is_dot_dapi() {
    let dir = config_dir().expect("home directory should resolve");
    assert!(dir.ends_with(".dapi"));
    let path = Config::config_path_with(|_| None).expect("path should resolve");
    assert_eq!(path, dir.join("config.toml"));
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn empty_node_name_is_invalid() {
    let mut config = Config::default();
    config.node.name.clear();
    assert!(config.validate().is_err());
}

#[test]
fn duplicate_nodes_are_invalid() {
    let toml = r#"
[node]
name = "a"
[cluster]
master = "a"
[[cluster.nodes]]
name = "b"
[[cluster.nodes]]
name = "b"
"#;
    let err = Config::from_toml(toml)
        .expect("parse")
        .validate()
        .expect_err("duplicates should fail");
    assert!(err.to_string().contains("duplicate"));
}

#[test]
fn unknown_master_is_invalid() {
    let mut config = cluster_config();
    config.cluster.master = Some("nobody".to_owned());
    let err = config.validate().expect_err("unknown master should fail");
    assert!(err.to_string().contains("nobody"));
}

#[test]
fn nodes_without_master_are_invalid() {
    let mut config = cluster_config();
    config.cluster.master = None;
    assert!(config.validate().is_err());
}

#[test]
fn bad_address_is_invalid() {
    let mut config = cluster_config();
    config.cluster.nodes[1].address = Some("not a url".to_owned());
    assert!(config.validate().is_err());
}

#[test]
fn timeout_bounds_are_checked() {
    let mut config = cluster_config();
    config.router.request_timeout_secs = 0;
    assert!(config.validate().is_err());

    config.router.request_timeout_secs = 601;
    assert!(config.validate().is_err());
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

#[test]
fn cluster_topology_reflects_config() {
    let topology = cluster_config().cluster_topology();
    assert_eq!(topology.current, "master-node");
    assert!(topology.is_master());
    assert_eq!(topology.nodes.len(), 3);
    assert!(topology.is_reachable("worker1"));
    assert!(!topology.is_reachable("worker2"));
}

#[test]
fn current_node_is_added_when_missing_from_nodes() {
    let mut config = cluster_config();
    config.node.name = "observer".to_owned();
    let topology = config.cluster_topology();
    assert_eq!(topology.nodes[0].name, "observer");
    assert!(!topology.is_master());
}

#[test]
fn topology_source_starts_from_config() {
    let source = cluster_config().topology();
    assert_eq!(source.snapshot(), cluster_config().cluster_topology());
}

// ---------------------------------------------------------------------------
// load_config
// ---------------------------------------------------------------------------

#[test]
fn load_config_reads_file() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, CLUSTER_TOML).expect("should write config");

    let config = load_config(&path).expect("config should load");
    assert_eq!(config.cluster.nodes.len(), 3);
}

#[test]
fn load_config_missing_file_is_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let result = load_config(&tmp.path().join("absent.toml"));
    assert!(result.is_err());
}
