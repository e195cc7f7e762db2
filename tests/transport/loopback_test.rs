//! In-process transport and a router running over it.

use std::sync::Arc;

use uuid::Uuid;

use dapi::cluster::{ClusterTopology, NodeInfo, StaticTopology};
use dapi::operations::builtin::{NODE_INFO, PING};
use dapi::operations::{NodeContext, OperationRegistry};
use dapi::rbac::PermissionSet;
use dapi::router::{DistributedApi, NodeService, RouterSettings};
use dapi::transport::{LoopbackTransport, RemoteCall, RemoteTransport, TransportError};
use dapi::types::{Arguments, RoutingMode};

fn node_service(name: &str, is_master: bool, registry: &Arc<OperationRegistry>) -> Arc<NodeService> {
    Arc::new(NodeService::new(
        NodeContext {
            node: name.to_owned(),
            is_master,
        },
        Arc::clone(registry),
    ))
}

fn ping(permissions: &[&str]) -> RemoteCall {
    RemoteCall {
        request_id: Uuid::new_v4(),
        origin: "master".to_owned(),
        operation_id: PING.to_owned(),
        arguments: Arguments::new(),
        caller_permissions: PermissionSet::parse(permissions).expect("parse"),
        synchronous: true,
    }
}

#[tokio::test]
async fn call_reaches_registered_service() {
    let registry = Arc::new(OperationRegistry::with_builtins());
    let transport = LoopbackTransport::new();
    transport.register(node_service("worker1", false, &registry));

    let outcome = transport
        .call(&NodeInfo::new("worker1"), ping(&["cluster:read"]))
        .await
        .expect("outcome");
    assert!(outcome.is_success());
    assert_eq!(outcome.output.affected_items[0]["name"], "worker1");
    assert_eq!(outcome.output.affected_items[0]["type"], "worker");
}

#[tokio::test]
async fn unknown_node_is_a_transport_error() {
    let transport = LoopbackTransport::new();
    let err = transport
        .call(&NodeInfo::new("ghost"), ping(&["cluster:read"]))
        .await
        .expect_err("unknown");
    assert_eq!(err, TransportError::UnknownNode("ghost".to_owned()));
    assert!(transport
        .cancel(&NodeInfo::new("ghost"), Uuid::new_v4())
        .await
        .is_err());
}

#[tokio::test]
async fn worker_router_forwards_to_master_service() {
    let registry = Arc::new(OperationRegistry::with_builtins());
    let transport = Arc::new(LoopbackTransport::new());
    transport.register(node_service("master", true, &registry));
    transport.register(node_service("worker2", false, &registry));

    let topology = ClusterTopology::new(
        "worker1",
        Some("master".to_owned()),
        vec![
            NodeInfo::new("master"),
            NodeInfo::new("worker1"),
            NodeInfo::new("worker2"),
        ],
    );
    let api = DistributedApi::new(
        Arc::clone(&registry),
        Arc::new(StaticTopology::new(topology)),
        transport,
        RouterSettings::default(),
    );

    let spec = api
        .call_spec(NODE_INFO)
        .expect("built-in")
        .routing_mode(RoutingMode::DistributedMaster)
        .permissions(PermissionSet::parse(["cluster:read"]).expect("parse"))
        .build()
        .expect("spec");
    let result = api.distribute(&spec).await.expect("forwarded");
    assert_eq!(result.affected_items[0]["name"], "master");
    assert_eq!(result.affected_items[0]["type"], "master");

    let spec = api
        .call_spec(PING)
        .expect("built-in")
        .permissions(PermissionSet::parse(["cluster:read@node:id:worker*"]).expect("parse"))
        .build()
        .expect("spec");
    let result = api.distribute(&spec).await.expect("broadcast");
    let names: Vec<&str> = result
        .affected_items
        .iter()
        .filter_map(|item| item["name"].as_str())
        .collect();
    // Topology order; master is filtered out of the caller's view.
    assert_eq!(names, vec!["worker1", "worker2"]);
    assert_eq!(result.total_failed_items, 0);
    assert_eq!(result.total_affected_items, 2);
}
