//! Execution coordinator.
//!
//! Runs one call on every selected node at once and returns one outcome per
//! node, in selection order. Node-level failures (operation errors, timeouts,
//! transport errors, panics) become error outcomes and never stop siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cluster::{ClusterTopology, NodeInfo};
use crate::operations::NodeContext;
use crate::transport::{RemoteCall, RemoteTransport};
use crate::types::{NodeError, NodeErrorKind, NodeId, NodeOutcome};

use super::node::{outcome_from_join, spawn_operation, submit_operation};
use super::CallSpec;

/// The caller cancelled before every node answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("call cancelled by caller")]
pub struct Cancelled;

/// Shared inputs for one execution.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    /// Snapshot taken when the call started.
    pub topology: &'a ClusterTopology,
    /// Transport for non-local targets.
    pub transport: &'a Arc<dyn RemoteTransport>,
    /// Fired when the caller goes away.
    pub cancel: &'a CancellationToken,
}

async fn with_timeout<F: Future>(
    timeout: Option<Duration>,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match timeout {
        Some(budget) => tokio::time::timeout(budget, fut).await,
        None => Ok(fut.await),
    }
}

fn timeout_error(timeout: Option<Duration>) -> NodeError {
    let secs = timeout.map_or(0.0, |t| t.as_secs_f64());
    NodeError::new(
        NodeErrorKind::Timeout,
        format!("no response within {secs:.1}s"),
    )
}

fn cancelled_error() -> NodeError {
    NodeError::new(NodeErrorKind::Cancelled, "call cancelled by caller")
}

/// Execute `spec` on every node in `targets`.
///
/// Outcomes come back in `targets` order. Wall-clock time is bounded by the
/// slowest node (or the call timeout), not by the sum of node times.
///
/// # Errors
///
/// Returns [`Cancelled`] if `ctx.cancel` fired; any outcomes gathered so far
/// are discarded.
pub async fn execute(
    spec: &CallSpec,
    targets: &[NodeId],
    ctx: ExecutionContext<'_>,
) -> Result<Vec<NodeOutcome>, Cancelled> {
    let request_id = Uuid::new_v4();
    debug!(
        operation = spec.operation_id(),
        %request_id,
        targets = targets.len(),
        synchronous = spec.synchronous(),
        "fanning out call"
    );

    let per_node = targets.iter().map(|node| async move {
        if ctx.topology.is_local(node) {
            run_local(spec, node, ctx).await
        } else {
            run_remote(spec, node, request_id, ctx).await
        }
    });
    let outcomes = join_all(per_node).await;

    if ctx.cancel.is_cancelled() {
        return Err(Cancelled);
    }
    for outcome in &outcomes {
        debug!(
            node = %outcome.node,
            %request_id,
            success = outcome.is_success(),
            affected = outcome.output.affected_items.len(),
            "node outcome"
        );
    }
    Ok(outcomes)
}

async fn run_local(spec: &CallSpec, node: &str, ctx: ExecutionContext<'_>) -> NodeOutcome {
    let context = NodeContext {
        node: node.to_owned(),
        is_master: ctx.topology.is_master(),
    };
    let operation = Arc::clone(spec.operation());
    let args = spec.arguments().clone();

    if !spec.synchronous() {
        return submit_operation(operation, args, context);
    }

    let handle = spawn_operation(operation, args, context);
    tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => NodeOutcome::error(node, cancelled_error()),
        joined = with_timeout(spec.timeout(), handle) => match joined {
            Ok(joined) => outcome_from_join(node, joined),
            Err(_) => {
                warn!(node, operation = spec.operation_id(), "local operation timed out");
                NodeOutcome::error(node, timeout_error(spec.timeout()))
            }
        },
    }
}

async fn run_remote(
    spec: &CallSpec,
    node: &str,
    request_id: Uuid,
    ctx: ExecutionContext<'_>,
) -> NodeOutcome {
    let Some(info) = ctx.topology.node(node).cloned() else {
        return NodeOutcome::error(
            node,
            NodeError::new(
                NodeErrorKind::Transport,
                format!("node '{node}' is not in the topology"),
            ),
        );
    };
    let call = RemoteCall {
        request_id,
        origin: ctx.topology.current.clone(),
        operation_id: spec.operation_id().to_owned(),
        arguments: spec.arguments().clone(),
        caller_permissions: spec.caller_permissions().clone(),
        synchronous: spec.synchronous(),
    };

    let result = tokio::select! {
        biased;
        () = ctx.cancel.cancelled() => {
            send_cancel(ctx.transport, info.clone(), request_id);
            return NodeOutcome::error(node, cancelled_error());
        }
        result = with_timeout(spec.timeout(), ctx.transport.call(&info, call)) => result,
    };

    match result {
        Ok(Ok(mut outcome)) => {
            outcome.node = node.to_owned();
            outcome
        }
        Ok(Err(e)) => {
            warn!(node, error = %e, "remote call failed");
            NodeOutcome::error(node, e.to_node_error())
        }
        Err(_) => {
            warn!(node, operation = spec.operation_id(), "remote call timed out");
            send_cancel(ctx.transport, info, request_id);
            NodeOutcome::error(node, timeout_error(spec.timeout()))
        }
    }
}

/// Fire-and-forget cancellation notice.
fn send_cancel(
    transport: &Arc<dyn RemoteTransport>,
    node: NodeInfo,
    request_id: Uuid,
) {
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        if let Err(e) = transport.cancel(&node, request_id).await {
            debug!(node = %node.name, %request_id, error = %e, "cancel notice not delivered");
        }
    });
}
