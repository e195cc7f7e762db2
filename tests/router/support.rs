//! Shared fixtures: a scripted transport and a few operations.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use dapi::cluster::{ClusterTopology, NodeInfo, StaticTopology};
use dapi::operations::{FnOperation, NodeContext, Operation, OperationError, OperationRegistry};
use dapi::rbac::ResourcePolicy;
use dapi::router::{DistributedApi, RouterSettings};
use dapi::transport::{RemoteCall, RemoteTransport, TransportError};
use dapi::types::{Arguments, NodeError, NodeOutcome, OperationOutput, RoutingMode};

/// How a scripted node answers.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Answer with these items.
    Items(Vec<Value>),
    /// Answer with these items after a delay.
    Delayed(Duration, Vec<Value>),
    /// Answer with an error outcome.
    Fail(NodeError),
    /// Acknowledge for asynchronous execution.
    Accept,
    /// Never answer.
    Hang,
    /// The transport cannot reach the node.
    Unreachable,
}

/// Transport whose nodes answer from a script and record what they saw.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<(String, RemoteCall)>>,
    cancels: Mutex<Vec<(String, Uuid)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, node: &str, reply: Reply) -> Self {
        self.replies.insert(node.to_owned(), reply);
        self
    }

    pub fn calls(&self) -> Vec<(String, RemoteCall)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn cancels(&self) -> Vec<(String, Uuid)> {
        self.cancels.lock().expect("cancels lock").clone()
    }
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn call(&self, node: &NodeInfo, call: RemoteCall) -> Result<NodeOutcome, TransportError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((node.name.clone(), call));
        let reply = self
            .replies
            .get(&node.name)
            .cloned()
            .ok_or_else(|| TransportError::UnknownNode(node.name.clone()))?;
        match reply {
            Reply::Items(items) => Ok(NodeOutcome::ok(
                node.name.clone(),
                OperationOutput::affected(items),
            )),
            Reply::Delayed(delay, items) => {
                tokio::time::sleep(delay).await;
                Ok(NodeOutcome::ok(
                    node.name.clone(),
                    OperationOutput::affected(items),
                ))
            }
            Reply::Fail(error) => Ok(NodeOutcome::error(node.name.clone(), error)),
            Reply::Accept => Ok(NodeOutcome::accepted(node.name.clone())),
            Reply::Hang => std::future::pending().await,
            Reply::Unreachable => Err(TransportError::Connect {
                node: node.name.clone(),
                reason: "connection refused".to_owned(),
            }),
        }
    }

    async fn cancel(&self, node: &NodeInfo, request_id: Uuid) -> Result<(), TransportError> {
        self.cancels
            .lock()
            .expect("cancels lock")
            .push((node.name.clone(), request_id));
        Ok(())
    }
}

/// Operation that sleeps before answering with its node's name.
#[derive(Debug)]
pub struct SlowOperation {
    pub id: String,
    pub delay: Duration,
}

#[async_trait]
impl Operation for SlowOperation {
    fn id(&self) -> &str {
        &self.id
    }

    fn routing_mode(&self) -> RoutingMode {
        RoutingMode::LocalAny
    }

    async fn call(
        &self,
        _args: &Arguments,
        node: &NodeContext,
    ) -> Result<OperationOutput, OperationError> {
        tokio::time::sleep(self.delay).await;
        Ok(OperationOutput::affected(vec![
            serde_json::json!({"name": node.node}),
        ]))
    }
}

/// Operation answering with fixed items on every node.
pub fn items_operation(id: &str, mode: RoutingMode, items: Vec<Value>) -> Arc<dyn Operation> {
    Arc::new(FnOperation::new(id, mode, move |_, _| {
        Ok(OperationOutput::affected(items.clone()))
    }))
}

/// Operation answering with one item naming the executing node.
pub fn whoami_operation(id: &str, mode: RoutingMode) -> Arc<dyn Operation> {
    Arc::new(FnOperation::new(id, mode, |_, node| {
        Ok(OperationOutput::affected(vec![serde_json::json!({
            "name": node.node,
            "master": node.is_master,
        })]))
    }))
}

/// Operation that always fails with a coded error.
pub fn failing_operation(id: &str, mode: RoutingMode) -> Arc<dyn Operation> {
    Arc::new(FnOperation::new(id, mode, |_, _| {
        Err(OperationError::Failed {
            code: 1415,
            message: "rule file not found".to_owned(),
        })
    }))
}

/// RBAC policy over `item:id` resources selected by the `ids` argument.
pub fn item_policy() -> ResourcePolicy {
    ResourcePolicy::new("items:read", "item", "id")
        .argument("ids")
        .item_key("id")
}

/// Operation that records the arguments it was given and echoes one item per
/// requested id, plus an item for `B` that nobody asked for.
pub fn recording_operation(seen: Arc<Mutex<Vec<Arguments>>>) -> Arc<dyn Operation> {
    Arc::new(
        FnOperation::new("items.get", RoutingMode::LocalAny, move |args, _| {
            seen.lock().expect("seen lock").push(args.clone());
            let mut items: Vec<Value> = args
                .get("ids")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().map(|id| serde_json::json!({"id": id})).collect())
                .unwrap_or_default();
            items.push(serde_json::json!({"id": "B", "leaked": true}));
            Ok(OperationOutput::affected(items))
        })
        .with_policy(item_policy()),
    )
}

/// `master`, `worker1`, `worker2`, seen from `current`, all reachable.
pub fn three_nodes(current: &str) -> ClusterTopology {
    ClusterTopology::new(
        current,
        Some("master".to_owned()),
        vec![
            NodeInfo::new("master"),
            NodeInfo::new("worker1"),
            NodeInfo::new("worker2"),
        ],
    )
}

/// A router over `topology` with `operations` registered.
pub fn router(
    topology: ClusterTopology,
    transport: Arc<dyn RemoteTransport>,
    operations: Vec<Arc<dyn Operation>>,
) -> DistributedApi {
    let mut registry = OperationRegistry::new();
    for op in operations {
        registry.register(op);
    }
    DistributedApi::new(
        Arc::new(registry),
        Arc::new(StaticTopology::new(topology)),
        transport,
        RouterSettings::default(),
    )
}
