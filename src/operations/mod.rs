//! Operations the router can dispatch, and the registry that names them.
//!
//! An operation is the business function behind an API endpoint. The router
//! only needs its id, its natural routing mode, its RBAC policy, and a way to
//! call it with keyword arguments on a given node.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::rbac::ResourcePolicy;
use crate::types::{Arguments, NodeError, NodeErrorKind, NodeId, OperationOutput, RoutingMode};

pub mod builtin;

/// Errors an operation reports for the call as a whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    /// An argument was missing or had the wrong shape.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// Argument name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The addressed resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(String),
    /// Operation-specific failure with a numeric code.
    #[error("{message}")]
    Failed {
        /// Operation-specific error code.
        code: u32,
        /// Detail.
        message: String,
    },
}

impl OperationError {
    /// Operation-specific code, if any.
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Failed { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Convert into the data form carried in outcomes, keeping code and text.
    pub fn to_node_error(&self) -> NodeError {
        let error = NodeError::new(NodeErrorKind::Operation, self.to_string());
        match self.code() {
            Some(code) => error.with_code(code),
            None => error,
        }
    }
}

/// The node an operation is executing on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeContext {
    /// Executing node.
    pub node: NodeId,
    /// Whether the executing node is the cluster master.
    pub is_master: bool,
}

/// A dispatchable operation.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Stable id used to resolve the operation on remote nodes.
    fn id(&self) -> &str;

    /// Routing mode implied by what the operation does.
    fn routing_mode(&self) -> RoutingMode;

    /// RBAC requirements, or `None` for operations open to every caller.
    fn policy(&self) -> Option<&ResourcePolicy> {
        None
    }

    /// Run the operation on the node described by `node`.
    async fn call(
        &self,
        args: &Arguments,
        node: &NodeContext,
    ) -> Result<OperationOutput, OperationError>;
}

type OperationFn =
    dyn Fn(&Arguments, &NodeContext) -> Result<OperationOutput, OperationError> + Send + Sync;

/// An [`Operation`] backed by a plain function.
pub struct FnOperation {
    id: String,
    mode: RoutingMode,
    policy: Option<ResourcePolicy>,
    f: Box<OperationFn>,
}

impl FnOperation {
    /// Wrap `f` as an operation named `id` with the given routing mode.
    pub fn new<F>(id: impl Into<String>, mode: RoutingMode, f: F) -> Self
    where
        F: Fn(&Arguments, &NodeContext) -> Result<OperationOutput, OperationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            id: id.into(),
            mode,
            policy: None,
            f: Box::new(f),
        }
    }

    /// Attach an RBAC policy.
    pub fn with_policy(mut self, policy: ResourcePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

impl fmt::Debug for FnOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperation")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Operation for FnOperation {
    fn id(&self) -> &str {
        &self.id
    }

    fn routing_mode(&self) -> RoutingMode {
        self.mode
    }

    fn policy(&self) -> Option<&ResourcePolicy> {
        self.policy.as_ref()
    }

    async fn call(
        &self,
        args: &Arguments,
        node: &NodeContext,
    ) -> Result<OperationOutput, OperationError> {
        (self.f)(args, node)
    }
}

/// Operations known to a node, by id.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.ids())
            .finish()
    }
}

impl OperationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in cluster operations.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register an operation, replacing any previous one with the same id.
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        self.operations
            .insert(operation.id().to_owned(), operation);
    }

    /// Look up an operation by id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(id).cloned()
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.operations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Read an optional string-list argument (`"a"` or `["a", "b"]`).
///
/// # Errors
///
/// Returns [`OperationError::InvalidArgument`] for any other shape.
pub fn string_list_arg(args: &Arguments, name: &str) -> Result<Option<Vec<String>>, OperationError> {
    let invalid = || OperationError::InvalidArgument {
        name: name.to_owned(),
        reason: "expected a string or a list of strings".to_owned(),
    };
    match args.get(name) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(vec![s.clone()])),
        Some(serde_json::Value::Array(values)) => values
            .iter()
            .map(|v| v.as_str().map(str::to_owned).ok_or_else(invalid))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid()),
    }
}
