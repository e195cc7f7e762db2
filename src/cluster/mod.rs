//! Cluster topology as the router sees it.
//!
//! Membership and discovery are somebody else's job. The router asks a
//! [`TopologySource`] for a [`ClusterTopology`] snapshot once per call and
//! never looks again.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::NodeId;

pub mod selector;

pub use selector::{select_nodes, Selection, SelectionError};

/// One cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node name.
    pub name: NodeId,
    /// Base URL of the node's router endpoint. `None` for the local node.
    #[serde(default)]
    pub address: Option<String>,
    /// Whether the node answered its last health probe.
    #[serde(default = "default_reachable")]
    pub reachable: bool,
}

fn default_reachable() -> bool {
    true
}

impl NodeInfo {
    /// A reachable node with no address.
    pub fn new(name: impl Into<NodeId>) -> Self {
        Self {
            name: name.into(),
            address: None,
            reachable: true,
        }
    }

    /// Set the base address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set reachability.
    pub fn with_reachable(mut self, reachable: bool) -> Self {
        self.reachable = reachable;
        self
    }
}

/// Point-in-time view of the cluster from the node handling a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    /// Node handling the request.
    pub current: NodeId,
    /// Master node, if the cluster currently has one.
    pub master: Option<NodeId>,
    /// All members in a stable order. Always includes `current`.
    pub nodes: Vec<NodeInfo>,
}

impl ClusterTopology {
    /// Build a topology, inserting the current node first if `nodes` lacks it.
    pub fn new(current: impl Into<NodeId>, master: Option<NodeId>, nodes: Vec<NodeInfo>) -> Self {
        let current = current.into();
        let mut nodes = nodes;
        if !nodes.iter().any(|n| n.name == current) {
            nodes.insert(0, NodeInfo::new(current.clone()));
        }
        Self {
            current,
            master,
            nodes,
        }
    }

    /// A single-node cluster in which the only node is the master.
    pub fn standalone(name: impl Into<NodeId>) -> Self {
        let name = name.into();
        Self::new(name.clone(), Some(name), Vec::new())
    }

    /// Whether the current node is the master.
    pub fn is_master(&self) -> bool {
        self.master.as_deref() == Some(self.current.as_str())
    }

    /// Whether `node` is the current node.
    pub fn is_local(&self, node: &str) -> bool {
        self.current == node
    }

    /// Look up a member by name.
    pub fn node(&self, name: &str) -> Option<&NodeInfo> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Whether `name` can be reached. The current node always can.
    pub fn is_reachable(&self, name: &str) -> bool {
        self.is_local(name) || self.node(name).is_some_and(|n| n.reachable)
    }
}

/// Supplies topology snapshots on demand.
pub trait TopologySource: Send + Sync {
    /// The current view of the cluster.
    fn snapshot(&self) -> ClusterTopology;
}

/// A topology held in memory, updated by whoever tracks node health.
#[derive(Debug)]
pub struct StaticTopology {
    inner: RwLock<ClusterTopology>,
}

impl StaticTopology {
    /// Wrap a topology.
    pub fn new(topology: ClusterTopology) -> Self {
        Self {
            inner: RwLock::new(topology),
        }
    }

    /// Mark a node reachable or unreachable. Unknown names are ignored.
    pub fn set_reachable(&self, name: &str, reachable: bool) {
        match self.inner.write() {
            Ok(mut topology) => {
                if let Some(node) = topology.nodes.iter_mut().find(|n| n.name == name) {
                    node.reachable = reachable;
                }
            }
            Err(e) => warn!(error = %e, "topology lock poisoned in set_reachable"),
        }
    }

    /// Change the master.
    pub fn set_master(&self, master: Option<NodeId>) {
        match self.inner.write() {
            Ok(mut topology) => topology.master = master,
            Err(e) => warn!(error = %e, "topology lock poisoned in set_master"),
        }
    }
}

impl TopologySource for StaticTopology {
    fn snapshot(&self) -> ClusterTopology {
        match self.inner.read() {
            Ok(topology) => topology.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
