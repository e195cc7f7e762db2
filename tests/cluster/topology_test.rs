//! Topology snapshots.

use dapi::cluster::{ClusterTopology, NodeInfo, StaticTopology, TopologySource};

#[test]
fn current_node_is_inserted_first_when_missing() {
    let topology = ClusterTopology::new(
        "worker1",
        Some("master".to_owned()),
        vec![NodeInfo::new("master")],
    );
    let names: Vec<&str> = topology.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, vec!["worker1", "master"]);
    assert!(!topology.is_master());
    assert!(topology.is_local("worker1"));
}

#[test]
fn standalone_node_is_master() {
    let topology = ClusterTopology::standalone("node01");
    assert!(topology.is_master());
    assert_eq!(topology.nodes.len(), 1);
}

#[test]
fn snapshots_are_independent_of_later_updates() {
    let source = StaticTopology::new(ClusterTopology::new(
        "master",
        Some("master".to_owned()),
        vec![NodeInfo::new("master"), NodeInfo::new("worker1")],
    ));
    let before = source.snapshot();
    source.set_reachable("worker1", false);
    source.set_master(None);
    let after = source.snapshot();

    assert!(before.is_reachable("worker1"));
    assert!(!after.is_reachable("worker1"));
    assert!(before.is_master());
    assert!(!after.is_master());
}

#[test]
fn unknown_node_is_not_reachable() {
    let topology = ClusterTopology::standalone("node01");
    assert!(!topology.is_reachable("ghost"));
    assert!(topology.node("ghost").is_none());
}
