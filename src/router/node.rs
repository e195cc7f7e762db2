//! Local execution and the receiving end of remote calls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::operations::{NodeContext, Operation, OperationError, OperationRegistry};
use crate::rbac::filter_arguments;
use crate::transport::RemoteCall;
use crate::types::{
    Arguments, NodeError, NodeErrorKind, NodeOutcome, NodeStatus, OperationOutput,
};

type OperationResult = Result<OperationOutput, OperationError>;

/// Run `operation` on its own task.
///
/// The task is never aborted by the router: dropping the handle detaches it,
/// so a caller that stops waiting discards the result without interrupting
/// the operation.
pub(crate) fn spawn_operation(
    operation: Arc<dyn Operation>,
    args: Arguments,
    context: NodeContext,
) -> JoinHandle<OperationResult> {
    tokio::spawn(async move { operation.call(&args, &context).await })
}

/// Turn a finished local task into an outcome for `node`.
pub(crate) fn outcome_from_join(
    node: &str,
    joined: Result<OperationResult, JoinError>,
) -> NodeOutcome {
    match joined {
        Ok(Ok(output)) => NodeOutcome::ok(node, output),
        Ok(Err(e)) => NodeOutcome::error(node, e.to_node_error()),
        Err(e) if e.is_panic() => {
            warn!(node, "operation panicked");
            NodeOutcome::error(
                node,
                NodeError::new(NodeErrorKind::Panicked, "operation aborted unexpectedly"),
            )
        }
        Err(e) => NodeOutcome::error(node, NodeError::new(NodeErrorKind::Cancelled, e.to_string())),
    }
}

/// Start `operation` without waiting and acknowledge it.
pub(crate) fn submit_operation(
    operation: Arc<dyn Operation>,
    args: Arguments,
    context: NodeContext,
) -> NodeOutcome {
    let node = context.node.clone();
    let ack = NodeOutcome::accepted(node.clone());
    let operation_id = operation.id().to_owned();
    let handle = spawn_operation(operation, args, context);
    let task_id = match &ack.status {
        NodeStatus::Accepted(task) => Some(task.task_id),
        _ => None,
    };
    tokio::spawn(async move {
        let outcome = outcome_from_join(&node, handle.await);
        match outcome.node_error() {
            None => info!(
                node = %node,
                operation = %operation_id,
                task_id = ?task_id,
                affected = outcome.output.affected_items.len(),
                "queued operation finished"
            ),
            Some(e) => warn!(
                node = %node,
                operation = %operation_id,
                task_id = ?task_id,
                error = %e,
                "queued operation failed"
            ),
        }
    });
    ack
}

/// Handles calls forwarded to this node by other nodes' routers.
pub struct NodeService {
    context: NodeContext,
    registry: Arc<OperationRegistry>,
    in_flight: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl std::fmt::Debug for NodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeService")
            .field("context", &self.context)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl NodeService {
    /// Serve `registry` as the node described by `context`.
    pub fn new(context: NodeContext, registry: Arc<OperationRegistry>) -> Self {
        Self {
            context,
            registry,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the node this service runs as.
    pub fn node(&self) -> &str {
        &self.context.node
    }

    /// Execute a forwarded call.
    ///
    /// Never fails: unknown operations, refused permissions and operation
    /// errors all come back as error outcomes.
    pub async fn handle(&self, call: RemoteCall) -> NodeOutcome {
        let node = self.context.node.clone();
        let Some(operation) = self.registry.get(&call.operation_id) else {
            warn!(node = %node, operation = %call.operation_id, "unknown operation");
            return NodeOutcome::error(
                node,
                NodeError::new(
                    NodeErrorKind::UnknownOperation,
                    format!("unknown operation '{}'", call.operation_id),
                ),
            );
        };

        let args = match filter_arguments(
            &call.caller_permissions,
            &call.operation_id,
            operation.policy(),
            &call.arguments,
        ) {
            Ok(args) => args,
            Err(denied) => {
                return NodeOutcome::error(
                    node,
                    NodeError::new(NodeErrorKind::PermissionDenied, denied.to_string()),
                )
            }
        };

        debug!(
            node = %node,
            origin = %call.origin,
            operation = %call.operation_id,
            request_id = %call.request_id,
            "handling remote call"
        );

        if !call.synchronous {
            return submit_operation(operation, args, self.context.clone());
        }

        let cancel = CancellationToken::new();
        let _in_flight = self.track(call.request_id, cancel.clone());
        let handle = spawn_operation(operation, args, self.context.clone());
        tokio::select! {
            biased;
            () = cancel.cancelled() => NodeOutcome::error(
                node.clone(),
                NodeError::new(NodeErrorKind::Cancelled, "call cancelled by origin"),
            ),
            joined = handle => outcome_from_join(&node, joined),
        }
    }

    /// Stop waiting for `request_id`. Returns `false` if it is not in flight.
    ///
    /// The operation itself keeps running; only its answer is dropped.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        let token = match self.in_flight.lock() {
            Ok(mut map) => map.remove(&request_id),
            Err(e) => {
                warn!(error = %e, "in-flight map lock poisoned in cancel");
                None
            }
        };
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn track(&self, request_id: Uuid, token: CancellationToken) -> InFlight<'_> {
        match self.in_flight.lock() {
            Ok(mut map) => {
                map.insert(request_id, token);
            }
            Err(e) => warn!(error = %e, "in-flight map lock poisoned"),
        }
        InFlight {
            service: self,
            request_id,
        }
    }
}

/// Removes a call from the in-flight map however `handle` exits.
struct InFlight<'a> {
    service: &'a NodeService,
    request_id: Uuid,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.service.in_flight.lock() {
            map.remove(&self.request_id);
        }
    }
}
