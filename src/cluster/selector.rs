//! Node selection: routing mode + topology snapshot -> target nodes.

use crate::types::{NodeId, RoutingMode};

use super::ClusterTopology;

/// Why no target set could be chosen.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    /// A master-only local call reached a node that is not the master.
    #[error("'local_master' call handled by '{current}', which is not the master (master: {})", .master.as_deref().unwrap_or("none"))]
    NotMaster {
        /// Node handling the request.
        current: NodeId,
        /// Actual master, if any.
        master: Option<NodeId>,
    },
    /// No node able to run the call is reachable.
    #[error("cluster unavailable for '{mode}': {reason}")]
    ClusterUnavailable {
        /// Requested routing mode.
        mode: RoutingMode,
        /// What was missing.
        reason: String,
    },
}

/// Targets chosen for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Nodes to run on, in topology order.
    pub targets: Vec<NodeId>,
    /// Nodes left out because they were unreachable.
    pub unreachable: Vec<NodeId>,
}

impl Selection {
    fn single(node: NodeId) -> Self {
        Self {
            targets: vec![node],
            unreachable: Vec::new(),
        }
    }
}

/// Resolve `mode` against `topology`.
///
/// # Errors
///
/// - [`SelectionError::NotMaster`] for `LocalMaster` off the master.
/// - [`SelectionError::ClusterUnavailable`] when there is no master, the
///   master is unreachable, or no node is reachable for `Broadcast`.
pub fn select_nodes(
    mode: RoutingMode,
    topology: &ClusterTopology,
) -> Result<Selection, SelectionError> {
    match mode {
        RoutingMode::LocalAny => Ok(Selection::single(topology.current.clone())),
        RoutingMode::LocalMaster => {
            if topology.is_master() {
                Ok(Selection::single(topology.current.clone()))
            } else {
                Err(SelectionError::NotMaster {
                    current: topology.current.clone(),
                    master: topology.master.clone(),
                })
            }
        }
        RoutingMode::DistributedMaster => {
            let master = topology
                .master
                .clone()
                .ok_or_else(|| SelectionError::ClusterUnavailable {
                    mode,
                    reason: "cluster has no master".to_owned(),
                })?;
            if !topology.is_reachable(&master) {
                return Err(SelectionError::ClusterUnavailable {
                    mode,
                    reason: format!("master '{master}' is unreachable"),
                });
            }
            Ok(Selection::single(master))
        }
        RoutingMode::Broadcast => {
            let (targets, unreachable): (Vec<_>, Vec<_>) = topology
                .nodes
                .iter()
                .map(|n| n.name.clone())
                .partition(|name| topology.is_reachable(name));
            if targets.is_empty() {
                return Err(SelectionError::ClusterUnavailable {
                    mode,
                    reason: "no reachable nodes".to_owned(),
                });
            }
            Ok(Selection {
                targets,
                unreachable,
            })
        }
    }
}
