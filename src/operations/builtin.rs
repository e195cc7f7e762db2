//! Built-in cluster operations.
//!
//! These are small, real operations every node registers. They back the CLI
//! and give the router something to dispatch without business modules.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::rbac::ResourcePolicy;
use crate::types::{OperationOutput, RoutingMode};

use super::{string_list_arg, FnOperation, NodeContext, OperationRegistry};

/// Id of the node-description operation.
pub const NODE_INFO: &str = "cluster.node_info";

/// Id of the cluster-wide liveness operation.
pub const PING: &str = "cluster.ping";

/// Action required to read node information.
pub const CLUSTER_READ: &str = "cluster:read";

fn node_policy() -> ResourcePolicy {
    ResourcePolicy::new(CLUSTER_READ, "node", "id")
        .argument("nodes_list")
        .item_key("name")
}

fn node_type(node: &NodeContext) -> &'static str {
    if node.is_master {
        "master"
    } else {
        "worker"
    }
}

/// Register every built-in operation.
pub fn register(registry: &mut OperationRegistry) {
    registry.register(Arc::new(
        FnOperation::new(NODE_INFO, RoutingMode::LocalAny, |_, node| {
            Ok(OperationOutput::affected(vec![json!({
                "name": node.node,
                "type": node_type(node),
                "version": env!("CARGO_PKG_VERSION"),
            })]))
        })
        .with_policy(node_policy()),
    ));

    registry.register(Arc::new(
        FnOperation::new(PING, RoutingMode::Broadcast, |args, node| {
            // A node outside the requested list answers with nothing.
            if let Some(wanted) = string_list_arg(args, "nodes_list")? {
                if !wanted.iter().any(|n| *n == node.node) {
                    return Ok(OperationOutput::default());
                }
            }
            Ok(OperationOutput::affected(vec![json!({
                "name": node.node,
                "type": node_type(node),
                "timestamp": Utc::now().to_rfc3339(),
            })]))
        })
        .with_policy(node_policy()),
    ));
}
