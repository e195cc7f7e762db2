//! Remote node transport.
//!
//! The router hands a [`RemoteCall`] to a [`RemoteTransport`] and expects a
//! [`NodeOutcome`] back. Framing, connection pooling and retries belong to
//! the transport; the router only adds a timeout and a best-effort cancel.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::NodeInfo;
use crate::rbac::PermissionSet;
use crate::types::{Arguments, NodeError, NodeErrorKind, NodeId, NodeOutcome};

pub mod http;
pub mod loopback;

pub use http::HttpTransport;
pub use loopback::LoopbackTransport;

/// What travels to a remote node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCall {
    /// Identifies this call for cancellation.
    pub request_id: Uuid,
    /// Node that originated the call.
    pub origin: NodeId,
    /// Operation to run.
    pub operation_id: String,
    /// Already-filtered keyword arguments.
    pub arguments: Arguments,
    /// Caller permissions, forwarded so the target can re-check them.
    pub caller_permissions: PermissionSet,
    /// Whether the target should run to completion before answering.
    pub synchronous: bool,
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The node has no address to send to.
    #[error("node '{0}' has no address")]
    NoAddress(NodeId),
    /// The transport does not know the node.
    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),
    /// The request could not be delivered.
    #[error("failed to reach node '{node}': {reason}")]
    Connect {
        /// Target node.
        node: NodeId,
        /// Underlying failure.
        reason: String,
    },
    /// The node answered with something other than an outcome.
    #[error("bad response from node '{node}': {reason}")]
    Protocol {
        /// Target node.
        node: NodeId,
        /// What was wrong.
        reason: String,
    },
}

impl TransportError {
    /// Convert into the data form carried in outcomes.
    pub fn to_node_error(&self) -> NodeError {
        NodeError::new(NodeErrorKind::Transport, self.to_string())
    }
}

/// Carries calls to remote nodes.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Deliver `call` to `node` and wait for its outcome.
    async fn call(&self, node: &NodeInfo, call: RemoteCall) -> Result<NodeOutcome, TransportError>;

    /// Ask `node` to abandon `request_id`. Delivery is not guaranteed.
    async fn cancel(&self, node: &NodeInfo, request_id: Uuid) -> Result<(), TransportError>;
}
