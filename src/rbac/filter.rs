//! Permission filter applied before and after execution.
//!
//! Operations that touch RBAC-guarded resources declare a [`ResourcePolicy`]:
//! which action they need, which resource class they touch, which argument
//! names the requested resources, and which item field identifies a resource
//! in the results. The filter narrows the argument to what the caller may
//! touch and strips result items the caller may not see.

use serde_json::Value;
use tracing::debug;

use crate::types::{keyed_identity, Arguments, FailedItem, FailureScope, NodeOutcome};

use super::{PermissionSet, Resource};

/// RBAC requirements of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    /// Required action, e.g. `rules:read`.
    pub action: String,
    /// Resource class, e.g. `rule`.
    pub kind: String,
    /// Identifying field, e.g. `file`.
    pub field: String,
    /// Argument holding the requested ids, if the operation takes one.
    pub argument: Option<String>,
    /// Field identifying a resource in result items.
    pub item_key: Option<String>,
}

impl ResourcePolicy {
    /// Policy for `action` over the `<kind>:<field>` resource class.
    pub fn new(action: impl Into<String>, kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            kind: kind.into(),
            field: field.into(),
            argument: None,
            item_key: None,
        }
    }

    /// Name the argument that selects resources.
    pub fn argument(mut self, name: impl Into<String>) -> Self {
        self.argument = Some(name.into());
        self
    }

    /// Name the result field that identifies resources.
    pub fn item_key(mut self, key: impl Into<String>) -> Self {
        self.item_key = Some(key.into());
        self
    }

    fn resource<'a>(&'a self, id: &'a str) -> Resource<'a> {
        Resource {
            kind: &self.kind,
            field: &self.field,
            id,
        }
    }
}

/// Every requested resource was denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("permission denied for '{operation}': {action} not granted{}", describe_denied(.denied))]
pub struct PermissionDenied {
    /// Operation the caller attempted.
    pub operation: String,
    /// Action that was missing.
    pub action: String,
    /// Requested resource ids, all of which were denied. Empty when the
    /// caller holds no grant for the action at all.
    pub denied: Vec<String>,
}

fn describe_denied(denied: &[String]) -> String {
    if denied.is_empty() {
        String::new()
    } else {
        format!(" on {}", denied.join(", "))
    }
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Narrow `arguments` to the resources the caller may touch.
///
/// - No policy: arguments pass unchanged.
/// - No grant for the action at all: [`PermissionDenied`].
/// - Resource argument absent, empty, or caller unrestricted: unchanged.
/// - Otherwise the argument keeps only the allowed ids (same shape as given);
///   if none remain, [`PermissionDenied`] listing the requested ids.
///
/// Applying the filter to its own output yields the same arguments.
///
/// # Errors
///
/// Returns [`PermissionDenied`] as described above.
pub fn filter_arguments(
    permissions: &PermissionSet,
    operation_id: &str,
    policy: Option<&ResourcePolicy>,
    arguments: &Arguments,
) -> Result<Arguments, PermissionDenied> {
    let Some(policy) = policy else {
        return Ok(arguments.clone());
    };

    let denied = |ids: Vec<String>| PermissionDenied {
        operation: operation_id.to_owned(),
        action: policy.action.clone(),
        denied: ids,
    };

    if !permissions.grants_any(&policy.action, &policy.kind, &policy.field) {
        return Err(denied(Vec::new()));
    }

    let Some(arg_name) = policy.argument.as_deref() else {
        return Ok(arguments.clone());
    };
    let Some(requested) = arguments.get(arg_name) else {
        return Ok(arguments.clone());
    };
    if permissions.is_unrestricted(&policy.action, &policy.kind, &policy.field) {
        return Ok(arguments.clone());
    }

    let allowed = |value: &Value| {
        scalar_id(value)
            .is_some_and(|id| permissions.allows(&policy.action, &policy.resource(&id)))
    };

    let narrowed = match requested {
        Value::Array(values) if values.is_empty() => return Ok(arguments.clone()),
        Value::Array(values) => {
            let kept: Vec<Value> = values.iter().filter(|v| allowed(v)).cloned().collect();
            if kept.is_empty() {
                return Err(denied(values.iter().filter_map(scalar_id).collect()));
            }
            if kept.len() < values.len() {
                debug!(
                    operation = operation_id,
                    argument = arg_name,
                    requested = values.len(),
                    allowed = kept.len(),
                    "narrowed resource argument"
                );
            }
            Value::Array(kept)
        }
        Value::Null => return Ok(arguments.clone()),
        single => {
            if !allowed(single) {
                return Err(denied(scalar_id(single).into_iter().collect()));
            }
            single.clone()
        }
    };

    let mut filtered = arguments.clone();
    filtered.insert(arg_name.to_owned(), narrowed);
    Ok(filtered)
}

/// Drop result items whose identity the caller may not see.
///
/// Items without the policy's identity field are kept. Removed items are not
/// reported anywhere.
pub fn filter_results(
    permissions: &PermissionSet,
    policy: Option<&ResourcePolicy>,
    items: Vec<Value>,
) -> Vec<Value> {
    let Some((policy, key)) = policy.and_then(|p| p.item_key.as_deref().map(|k| (p, k))) else {
        return items;
    };
    if permissions.is_unrestricted(&policy.action, &policy.kind, &policy.field) {
        return items;
    }
    items
        .into_iter()
        .filter(|item| {
            keyed_identity(item, key)
                .is_none_or(|id| permissions.allows(&policy.action, &policy.resource(&id)))
        })
        .collect()
}

/// Drop item-scoped failures for resources the caller may not see.
///
/// Node-scoped failures are kept: they describe the cluster, not a resource.
pub fn filter_failed_items(
    permissions: &PermissionSet,
    policy: Option<&ResourcePolicy>,
    failed: Vec<FailedItem>,
) -> Vec<FailedItem> {
    let Some(policy) = policy.filter(|p| p.item_key.is_some() || p.argument.is_some()) else {
        return failed;
    };
    if permissions.is_unrestricted(&policy.action, &policy.kind, &policy.field) {
        return failed;
    }
    failed
        .into_iter()
        .filter(|f| {
            f.scope == FailureScope::Node
                || permissions.allows(&policy.action, &policy.resource(&f.id))
        })
        .collect()
}

/// Apply result filtering to one node's outcome.
pub fn filter_outcome(
    permissions: &PermissionSet,
    policy: Option<&ResourcePolicy>,
    mut outcome: NodeOutcome,
) -> NodeOutcome {
    let affected = std::mem::take(&mut outcome.output.affected_items);
    let failed = std::mem::take(&mut outcome.output.failed_items);
    outcome.output.affected_items = filter_results(permissions, policy, affected);
    outcome.output.failed_items = filter_failed_items(permissions, policy, failed);
    outcome
}
