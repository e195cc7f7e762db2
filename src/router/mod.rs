//! Cluster call router.
//!
//! A [`CallSpec`] describes one unit of work. [`DistributedApi::distribute`]
//! runs it end to end:
//! 1. Validates the timeout against the configured ceiling
//! 2. Narrows arguments to what the caller may touch
//! 3. Snapshots topology and selects target nodes
//! 4. Fans out through the [`coordinator`]
//! 5. Strips result items the caller may not see
//! 6. Merges per-node outcomes through the [`normalizer`]

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cluster::{select_nodes, SelectionError, TopologySource};
use crate::operations::{Operation, OperationRegistry};
use crate::rbac::{filter_arguments, filter_outcome, PermissionDenied, PermissionSet};
use crate::transport::RemoteTransport;
use crate::types::{AggregateResult, Arguments, NodeError, NodeId, RoutingMode};

pub mod coordinator;
pub mod node;
pub mod normalizer;

pub use coordinator::Cancelled;
pub use node::NodeService;

/// Timeout applied when a call does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest timeout a call may request.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A malformed call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No operation is registered under the id.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),
    /// A zero timeout can never succeed.
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    /// The requested timeout is above the configured ceiling.
    #[error("timeout of {}s exceeds the maximum of {}s", .requested.as_secs(), .max.as_secs())]
    TimeoutTooLarge {
        /// Requested timeout.
        requested: Duration,
        /// Configured ceiling.
        max: Duration,
    },
    /// A master-only operation reached a node that is not the master.
    #[error("'{current}' is not the master node (master: {}); use distributed_master", .master.as_deref().unwrap_or("none"))]
    NotMaster {
        /// Node handling the request.
        current: NodeId,
        /// Actual master, if any.
        master: Option<NodeId>,
    },
    /// An argument was given an empty name.
    #[error("argument names must not be empty")]
    EmptyArgumentName,
}

/// One failed node inside an aggregate failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    /// Node that failed.
    pub node: NodeId,
    /// Why it failed.
    pub error: NodeError,
}

fn summarize(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.node, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Call-level failures. Anything node-local is data inside the result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// The call itself is malformed.
    #[error("invalid call: {0}")]
    Validation(#[from] ValidationError),
    /// Every requested resource was denied.
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),
    /// No node able to run the call is reachable.
    #[error("cluster unavailable for '{mode}': {reason}")]
    ClusterUnavailable {
        /// Requested routing mode.
        mode: RoutingMode,
        /// What was missing.
        reason: String,
    },
    /// The single target node failed; carries its error unmodified.
    #[error("node '{node}' failed: {error}")]
    Remote {
        /// Node that failed.
        node: NodeId,
        /// Original error.
        error: NodeError,
    },
    /// Every node of a multi-node call failed.
    #[error("all {} nodes failed: {}", .failures.len(), summarize(.failures))]
    AggregateFailure {
        /// Per-node errors, in selection order.
        failures: Vec<NodeFailure>,
    },
    /// The caller cancelled the call.
    #[error("call cancelled by caller")]
    Cancelled,
}

impl From<SelectionError> for RouterError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::NotMaster { current, master } => {
                Self::Validation(ValidationError::NotMaster { current, master })
            }
            SelectionError::ClusterUnavailable { mode, reason } => {
                Self::ClusterUnavailable { mode, reason }
            }
        }
    }
}

impl From<Cancelled> for RouterError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl RouterError {
    /// Stable snake_case name. For [`RouterError::Remote`] this is the
    /// node error's own kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::PermissionDenied(_) => "permission_denied",
            Self::ClusterUnavailable { .. } => "cluster_unavailable",
            Self::Remote { error, .. } => error.kind.as_str(),
            Self::AggregateFailure { .. } => "aggregate_failure",
            Self::Cancelled => "cancelled",
        }
    }

    /// The serializable form handed to the API layer.
    pub fn to_structured(&self) -> StructuredError {
        let (code, node, failures) = match self {
            Self::Remote { node, error } => (error.code, Some(node.clone()), Vec::new()),
            Self::AggregateFailure { failures } => (None, None, failures.clone()),
            _ => (None, None, Vec::new()),
        };
        let message = match self {
            Self::Remote { error, .. } => error.message.clone(),
            other => other.to_string(),
        };
        StructuredError {
            kind: self.kind().to_owned(),
            code,
            message,
            node,
            failures,
        }
    }
}

/// Serializable call failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    /// Error kind, see [`RouterError::kind`].
    pub kind: String,
    /// Operation-specific code, when the failing operation supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    /// Human-readable detail.
    pub message: String,
    /// Failing node for single-target calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    /// Per-node errors for aggregate failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<NodeFailure>,
}

// ---------------------------------------------------------------------------
// Call spec
// ---------------------------------------------------------------------------

/// One unit of work. Immutable once built.
#[derive(Clone)]
pub struct CallSpec {
    operation: Arc<dyn Operation>,
    arguments: Arguments,
    routing_mode: RoutingMode,
    synchronous: bool,
    timeout: Option<Duration>,
    caller_permissions: PermissionSet,
}

impl fmt::Debug for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSpec")
            .field("operation", &self.operation.id())
            .field("arguments", &self.arguments)
            .field("routing_mode", &self.routing_mode)
            .field("synchronous", &self.synchronous)
            .field("timeout", &self.timeout)
            .field("caller_permissions", &self.caller_permissions)
            .finish()
    }
}

impl CallSpec {
    /// Start describing a call to `operation`.
    pub fn builder(operation: Arc<dyn Operation>) -> CallSpecBuilder {
        CallSpecBuilder::new(operation)
    }

    /// The operation to run.
    pub fn operation(&self) -> &Arc<dyn Operation> {
        &self.operation
    }

    /// Id of the operation to run.
    pub fn operation_id(&self) -> &str {
        self.operation.id()
    }

    /// Keyword arguments. Never contains `null` values.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Where the call runs.
    pub fn routing_mode(&self) -> RoutingMode {
        self.routing_mode
    }

    /// Whether the router waits for results.
    pub fn synchronous(&self) -> bool {
        self.synchronous
    }

    /// Per-call time budget; `None` waits for completion.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Permissions held by the caller.
    pub fn caller_permissions(&self) -> &PermissionSet {
        &self.caller_permissions
    }

    fn with_arguments(&self, arguments: Arguments) -> Self {
        Self {
            arguments,
            ..self.clone()
        }
    }
}

/// Builder for [`CallSpec`].
pub struct CallSpecBuilder {
    operation: Arc<dyn Operation>,
    arguments: Arguments,
    routing_mode: Option<RoutingMode>,
    synchronous: bool,
    timeout: Duration,
    wait_for_complete: bool,
    max_timeout: Duration,
    caller_permissions: PermissionSet,
    invalid: Option<ValidationError>,
}

impl fmt::Debug for CallSpecBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSpecBuilder")
            .field("operation", &self.operation.id())
            .field("arguments", &self.arguments)
            .field("routing_mode", &self.routing_mode)
            .finish_non_exhaustive()
    }
}

impl CallSpecBuilder {
    fn new(operation: Arc<dyn Operation>) -> Self {
        Self {
            operation,
            arguments: Arguments::new(),
            routing_mode: None,
            synchronous: true,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            wait_for_complete: false,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            caller_permissions: PermissionSet::empty(),
            invalid: None,
        }
    }

    /// Set one argument. `null` values are dropped.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name.is_empty() {
            self.invalid.get_or_insert(ValidationError::EmptyArgumentName);
            return self;
        }
        match value.into() {
            Value::Null => {
                self.arguments.remove(&name);
            }
            value => {
                self.arguments.insert(name, value);
            }
        }
        self
    }

    /// Set several arguments. `null` values are dropped.
    pub fn args(self, arguments: impl IntoIterator<Item = (String, Value)>) -> Self {
        arguments
            .into_iter()
            .fold(self, |builder, (name, value)| builder.arg(name, value))
    }

    /// Override the operation's declared routing mode.
    pub fn routing_mode(mut self, mode: RoutingMode) -> Self {
        self.routing_mode = Some(mode);
        self
    }

    /// Wait for results (`true`, the default) or return an acknowledgment.
    pub fn synchronous(mut self, synchronous: bool) -> Self {
        self.synchronous = synchronous;
        self
    }

    /// Per-call time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// With `true`, the call has no timeout.
    pub fn wait_for_complete(mut self, wait: bool) -> Self {
        self.wait_for_complete = wait;
        self
    }

    /// Permissions held by the caller.
    pub fn permissions(mut self, permissions: PermissionSet) -> Self {
        self.caller_permissions = permissions;
        self
    }

    fn limits(mut self, settings: &RouterSettings) -> Self {
        self.timeout = settings.default_timeout;
        self.max_timeout = settings.max_timeout;
        self
    }

    /// Finish the spec.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty argument name, a zero
    /// timeout, or a timeout above the ceiling.
    pub fn build(self) -> Result<CallSpec, ValidationError> {
        if let Some(invalid) = self.invalid {
            return Err(invalid);
        }
        let timeout = if self.wait_for_complete {
            None
        } else {
            if self.timeout.is_zero() {
                return Err(ValidationError::ZeroTimeout);
            }
            if self.timeout > self.max_timeout {
                return Err(ValidationError::TimeoutTooLarge {
                    requested: self.timeout,
                    max: self.max_timeout,
                });
            }
            Some(self.timeout)
        };
        let routing_mode = self
            .routing_mode
            .unwrap_or_else(|| self.operation.routing_mode());
        Ok(CallSpec {
            operation: self.operation,
            arguments: self.arguments,
            routing_mode,
            synchronous: self.synchronous,
            timeout,
            caller_permissions: self.caller_permissions,
        })
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Router limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    /// Timeout for calls that do not set one.
    pub default_timeout: Duration,
    /// Largest timeout a call may request.
    pub max_timeout: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_timeout: DEFAULT_MAX_TIMEOUT,
        }
    }
}

/// Entry point for the API layer.
///
/// Holds no per-call state; one instance serves concurrent calls.
pub struct DistributedApi {
    registry: Arc<OperationRegistry>,
    topology: Arc<dyn TopologySource>,
    transport: Arc<dyn RemoteTransport>,
    settings: RouterSettings,
}

impl fmt::Debug for DistributedApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedApi")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DistributedApi {
    /// Create a router.
    pub fn new(
        registry: Arc<OperationRegistry>,
        topology: Arc<dyn TopologySource>,
        transport: Arc<dyn RemoteTransport>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            topology,
            transport,
            settings,
        }
    }

    /// Operations this router can resolve by id.
    pub fn registry(&self) -> &Arc<OperationRegistry> {
        &self.registry
    }

    /// Start a call to a registered operation, with this router's limits.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownOperation`] for an unregistered id.
    pub fn call_spec(&self, operation_id: &str) -> Result<CallSpecBuilder, RouterError> {
        let operation = self
            .registry
            .get(operation_id)
            .ok_or_else(|| ValidationError::UnknownOperation(operation_id.to_owned()))?;
        Ok(CallSpec::builder(operation).limits(&self.settings))
    }

    /// Run `spec` and return the merged result.
    ///
    /// # Errors
    ///
    /// Returns a [`RouterError`] for call-level failures only; node-level
    /// failures of a broadcast are embedded in the result.
    pub async fn distribute(&self, spec: &CallSpec) -> Result<AggregateResult, RouterError> {
        self.distribute_with_cancel(spec, &CancellationToken::new())
            .await
    }

    /// Like [`distribute`](Self::distribute), abandoning in-flight nodes when
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`distribute`](Self::distribute), plus [`RouterError::Cancelled`].
    pub async fn distribute_with_cancel(
        &self,
        spec: &CallSpec,
        cancel: &CancellationToken,
    ) -> Result<AggregateResult, RouterError> {
        let started = Instant::now();
        if let Some(timeout) = spec.timeout() {
            if timeout > self.settings.max_timeout {
                return Err(ValidationError::TimeoutTooLarge {
                    requested: timeout,
                    max: self.settings.max_timeout,
                }
                .into());
            }
        }

        let operation = Arc::clone(spec.operation());
        let policy = operation.policy();
        let permissions = spec.caller_permissions();

        let arguments = filter_arguments(permissions, spec.operation_id(), policy, spec.arguments())
            .inspect_err(|e| warn!(operation = spec.operation_id(), error = %e, "call refused"))?;
        let filtered = spec.with_arguments(arguments);

        let topology = self.topology.snapshot();
        let selection = select_nodes(filtered.routing_mode(), &topology)?;
        if !selection.unreachable.is_empty() {
            warn!(
                operation = filtered.operation_id(),
                unreachable = ?selection.unreachable,
                "excluding unreachable nodes"
            );
        }
        info!(
            operation = filtered.operation_id(),
            mode = %filtered.routing_mode(),
            node = %topology.current,
            targets = selection.targets.len(),
            "distributing call"
        );

        let ctx = coordinator::ExecutionContext {
            topology: &topology,
            transport: &self.transport,
            cancel,
        };
        let outcomes = coordinator::execute(&filtered, &selection.targets, ctx).await?;
        let outcomes = outcomes
            .into_iter()
            .map(|outcome| filter_outcome(permissions, policy, outcome))
            .collect();

        let item_key = policy.and_then(|p| p.item_key.as_deref());
        let mut result = normalizer::normalize(filtered.routing_mode(), outcomes, item_key)?;
        result.unreachable_nodes = selection.unreachable;

        info!(
            operation = filtered.operation_id(),
            affected = result.total_affected_items,
            failed = result.total_failed_items,
            queued = result.queued_tasks.len(),
            elapsed = ?started.elapsed(),
            "call complete"
        );
        Ok(result)
    }
}
