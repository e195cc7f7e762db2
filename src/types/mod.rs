//! Value types shared by every stage of the call router.
//!
//! Everything here is plain data: node outcomes, failed items and the
//! aggregate result are call-scoped and carry no behaviour beyond small
//! helpers for construction and identity.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cluster node name.
pub type NodeId = String;

/// Keyword arguments passed to an operation, keyed by argument name.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Routing mode
// ---------------------------------------------------------------------------

/// Where an operation runs relative to the node handling the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Run on the node handling the request.
    LocalAny,
    /// Run on the node handling the request, which must be the master.
    LocalMaster,
    /// Forward to the master node.
    DistributedMaster,
    /// Run on every reachable node and merge.
    Broadcast,
}

impl RoutingMode {
    /// All routing modes, in declaration order.
    pub const ALL: [RoutingMode; 4] = [
        RoutingMode::LocalAny,
        RoutingMode::LocalMaster,
        RoutingMode::DistributedMaster,
        RoutingMode::Broadcast,
    ];

    /// Wire name used by API controllers (`local_any`, `broadcast`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalAny => "local_any",
            Self::LocalMaster => "local_master",
            Self::DistributedMaster => "distributed_master",
            Self::Broadcast => "broadcast",
        }
    }

    /// Returns `true` for modes that always resolve to exactly one node.
    pub fn is_single_target(self) -> bool {
        !matches!(self, Self::Broadcast)
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised routing mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown routing mode '{0}'")]
pub struct UnknownRoutingMode(pub String);

impl FromStr for RoutingMode {
    type Err = UnknownRoutingMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownRoutingMode(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Errors as data
// ---------------------------------------------------------------------------

/// Category of a node-level or item-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeErrorKind {
    /// The operation ran and reported a failure.
    Operation,
    /// The node did not answer within the call's timeout.
    Timeout,
    /// The request never reached the node or its answer was unreadable.
    Transport,
    /// The node does not know the requested operation.
    UnknownOperation,
    /// The node refused the forwarded caller permissions.
    PermissionDenied,
    /// The operation aborted abnormally.
    Panicked,
    /// The caller went away before the node answered.
    Cancelled,
}

impl NodeErrorKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operation => "operation",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::UnknownOperation => "unknown_operation",
            Self::PermissionDenied => "permission_denied",
            Self::Panicked => "panicked",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error carried as data inside outcomes and failed items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    /// Error category.
    pub kind: NodeErrorKind,
    /// Operation-specific numeric code, when the operation supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    /// Human-readable detail, passed through unmodified.
    pub message: String,
}

impl NodeError {
    /// Create an error of the given kind.
    pub fn new(kind: NodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Attach an operation-specific code.
    pub fn with_code(mut self, code: u32) -> Self {
        self.code = Some(code);
        self
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} error {code}: {}", self.kind, self.message),
            None => write!(f, "{} error: {}", self.kind, self.message),
        }
    }
}

/// Whether a failure concerns a single item or a whole node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    /// One resource item failed.
    #[default]
    Item,
    /// A node failed as a whole; `id` is the node name.
    Node,
}

/// An item that an operation attempted but could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Item identity (or node name for node-scoped failures).
    pub id: String,
    /// Why it failed.
    pub error: NodeError,
    /// Node that reported the failure. Filled in by the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    /// Item or node scope.
    #[serde(default)]
    pub scope: FailureScope,
}

impl FailedItem {
    /// An item-scoped failure.
    pub fn item(id: impl Into<String>, error: NodeError) -> Self {
        Self {
            id: id.into(),
            error,
            node: None,
            scope: FailureScope::Item,
        }
    }

    /// A node-scoped failure attributed to `node`.
    pub fn node(node: &str, error: NodeError) -> Self {
        Self {
            id: node.to_owned(),
            error,
            node: Some(node.to_owned()),
            scope: FailureScope::Node,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What an operation returns when it runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationOutput {
    /// Items the operation returned or changed, in operation order.
    #[serde(default)]
    pub affected_items: Vec<serde_json::Value>,
    /// Items the operation attempted but could not process.
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
}

impl OperationOutput {
    /// Output with the given affected items and no failures.
    pub fn affected(items: Vec<serde_json::Value>) -> Self {
        Self {
            affected_items: items,
            failed_items: Vec::new(),
        }
    }

    /// Builder-style helper adding a failed item.
    pub fn with_failed(mut self, item: FailedItem) -> Self {
        self.failed_items.push(item);
        self
    }
}

/// Acknowledgment for work handed off without waiting for its result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    /// Node that accepted the work.
    pub node: NodeId,
    /// Identifier for retrieving the result later.
    pub task_id: Uuid,
    /// When the node accepted the work.
    pub accepted_at: DateTime<Utc>,
}

/// Status of one node's execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    /// The operation completed.
    Ok,
    /// The node or the operation failed.
    Error(NodeError),
    /// The node accepted the work for asynchronous execution.
    Accepted(QueuedTask),
}

/// The result of running one call on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutcome {
    /// Node that produced this outcome.
    pub node: NodeId,
    /// Completion status.
    pub status: NodeStatus,
    /// Items reported by the operation (empty unless `status` is `Ok`).
    #[serde(default)]
    pub output: OperationOutput,
}

impl NodeOutcome {
    /// Successful outcome.
    pub fn ok(node: impl Into<NodeId>, output: OperationOutput) -> Self {
        Self {
            node: node.into(),
            status: NodeStatus::Ok,
            output,
        }
    }

    /// Failed outcome.
    pub fn error(node: impl Into<NodeId>, error: NodeError) -> Self {
        Self {
            node: node.into(),
            status: NodeStatus::Error(error),
            output: OperationOutput::default(),
        }
    }

    /// Accepted-for-later outcome with a fresh task id.
    pub fn accepted(node: impl Into<NodeId>) -> Self {
        let node = node.into();
        Self {
            status: NodeStatus::Accepted(QueuedTask {
                node: node.clone(),
                task_id: Uuid::new_v4(),
                accepted_at: Utc::now(),
            }),
            node,
            output: OperationOutput::default(),
        }
    }

    /// Returns `true` unless the node failed.
    pub fn is_success(&self) -> bool {
        !matches!(self.status, NodeStatus::Error(_))
    }

    /// The node error, if any.
    pub fn node_error(&self) -> Option<&NodeError> {
        match &self.status {
            NodeStatus::Error(e) => Some(e),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate result
// ---------------------------------------------------------------------------

/// The uniform success payload returned to the API layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Affected items, deduplicated by identity in first-seen order.
    pub affected_items: Vec<serde_json::Value>,
    /// Failed items across all responding nodes.
    pub failed_items: Vec<FailedItem>,
    /// Always `affected_items.len()`.
    pub total_affected_items: usize,
    /// Always `failed_items.len()`.
    pub total_failed_items: usize,
    /// Nodes excluded because they were unreachable when the call started.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreachable_nodes: Vec<NodeId>,
    /// Work accepted for asynchronous execution.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queued_tasks: Vec<QueuedTask>,
}

impl AggregateResult {
    /// Build a result, computing totals from the collections.
    pub fn new(affected_items: Vec<serde_json::Value>, failed_items: Vec<FailedItem>) -> Self {
        Self {
            total_affected_items: affected_items.len(),
            total_failed_items: failed_items.len(),
            affected_items,
            failed_items,
            unreachable_nodes: Vec::new(),
            queued_tasks: Vec::new(),
        }
    }
}

/// Identity of a result item.
///
/// With a key, the value under that key (strings verbatim, other scalars in
/// their JSON form). Without a key, or when the item lacks it, the item's
/// canonical JSON text.
pub fn item_identity(item: &serde_json::Value, key: Option<&str>) -> String {
    match key.and_then(|k| item.get(k)) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => item.to_string(),
    }
}

/// Identity under `key` only, or `None` when the item does not carry it.
pub fn keyed_identity(item: &serde_json::Value, key: &str) -> Option<String> {
    match item.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}
