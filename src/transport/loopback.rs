//! In-process transport.
//!
//! Dispatches calls straight to [`NodeService`]s living in the same process.
//! Used by the CLI to run a whole cluster locally and by tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cluster::NodeInfo;
use crate::router::NodeService;
use crate::types::{NodeId, NodeOutcome};

use super::{RemoteCall, RemoteTransport, TransportError};

/// Transport whose "network" is a map of node name to [`NodeService`].
#[derive(Default)]
pub struct LoopbackTransport {
    services: RwLock<HashMap<NodeId, Arc<NodeService>>>,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<NodeId> = match self.services.read() {
            Ok(map) => map.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        f.debug_struct("LoopbackTransport")
            .field("nodes", &nodes)
            .finish()
    }
}

impl LoopbackTransport {
    /// An empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `service` reachable under its node name.
    pub fn register(&self, service: Arc<NodeService>) {
        match self.services.write() {
            Ok(mut map) => {
                map.insert(service.node().to_owned(), service);
            }
            Err(e) => warn!(error = %e, "loopback transport lock poisoned in register"),
        }
    }

    fn service(&self, node: &str) -> Result<Arc<NodeService>, TransportError> {
        let map = self
            .services
            .read()
            .map_err(|e| TransportError::Connect {
                node: node.to_owned(),
                reason: format!("loopback transport lock poisoned: {e}"),
            })?;
        map.get(node)
            .cloned()
            .ok_or_else(|| TransportError::UnknownNode(node.to_owned()))
    }
}

#[async_trait]
impl RemoteTransport for LoopbackTransport {
    async fn call(&self, node: &NodeInfo, call: RemoteCall) -> Result<NodeOutcome, TransportError> {
        let service = self.service(&node.name)?;
        debug!(node = %node.name, operation = %call.operation_id, "loopback call");
        Ok(service.handle(call).await)
    }

    async fn cancel(&self, node: &NodeInfo, request_id: Uuid) -> Result<(), TransportError> {
        let service = self.service(&node.name)?;
        if !service.cancel(request_id) {
            debug!(node = %node.name, %request_id, "cancel for unknown or finished call");
        }
        Ok(())
    }
}
