//! Result normalizer: per-node outcomes -> one result or one error.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::types::{
    item_identity, AggregateResult, FailedItem, NodeOutcome, NodeStatus, RoutingMode,
};

use super::{NodeFailure, RouterError};

/// Merge `outcomes` for a call made in `mode`.
///
/// Single-target modes pass the one outcome through: an error becomes
/// [`RouterError::Remote`] with the original kind and message. Broadcast
/// merges successful nodes, deduplicating affected items by identity
/// (`item_key`, or the whole item) in first-seen order, keeps every node's
/// item failures tagged with that node, and reports failed nodes as
/// node-scoped failed items. Totals are always recomputed.
///
/// # Errors
///
/// - [`RouterError::Remote`] when the single target failed.
/// - [`RouterError::AggregateFailure`] when every broadcast node failed.
/// - [`RouterError::ClusterUnavailable`] when there are no outcomes at all.
pub fn normalize(
    mode: RoutingMode,
    outcomes: Vec<NodeOutcome>,
    item_key: Option<&str>,
) -> Result<AggregateResult, RouterError> {
    if outcomes.is_empty() {
        return Err(RouterError::ClusterUnavailable {
            mode,
            reason: "no node produced an outcome".to_owned(),
        });
    }
    if mode.is_single_target() {
        single(outcomes)
    } else {
        merge(outcomes, item_key)
    }
}

fn tag(mut item: FailedItem, node: &str) -> FailedItem {
    item.node.get_or_insert_with(|| node.to_owned());
    item
}

fn single(outcomes: Vec<NodeOutcome>) -> Result<AggregateResult, RouterError> {
    if outcomes.len() > 1 {
        warn!(outcomes = outcomes.len(), "single-target call produced several outcomes; using the first");
    }
    let Some(outcome) = outcomes.into_iter().next() else {
        return Ok(AggregateResult::default());
    };
    let node = outcome.node;
    match outcome.status {
        NodeStatus::Error(error) => Err(RouterError::Remote { node, error }),
        NodeStatus::Accepted(task) => {
            let mut result = AggregateResult::new(Vec::new(), Vec::new());
            result.queued_tasks.push(task);
            Ok(result)
        }
        NodeStatus::Ok => {
            let failed = outcome
                .output
                .failed_items
                .into_iter()
                .map(|f| tag(f, &node))
                .collect();
            Ok(AggregateResult::new(outcome.output.affected_items, failed))
        }
    }
}

fn merge(
    outcomes: Vec<NodeOutcome>,
    item_key: Option<&str>,
) -> Result<AggregateResult, RouterError> {
    let mut seen = HashSet::new();
    let mut affected = Vec::new();
    let mut failed = Vec::new();
    let mut queued = Vec::new();
    let mut failures = Vec::new();
    let mut any_success = false;

    for outcome in outcomes {
        let node = outcome.node;
        match outcome.status {
            NodeStatus::Ok => {
                any_success = true;
                for item in outcome.output.affected_items {
                    if seen.insert(item_identity(&item, item_key)) {
                        affected.push(item);
                    }
                }
                failed.extend(outcome.output.failed_items.into_iter().map(|f| tag(f, &node)));
            }
            NodeStatus::Accepted(task) => {
                any_success = true;
                queued.push(task);
            }
            NodeStatus::Error(error) => {
                debug!(node = %node, error = %error, "node failed in broadcast");
                failed.push(FailedItem::node(&node, error.clone()));
                failures.push(NodeFailure { node, error });
            }
        }
    }

    if !any_success {
        warn!(nodes = failures.len(), "every node failed");
        return Err(RouterError::AggregateFailure { failures });
    }

    // Every node keeps its own failures; only exact repeats from the same
    // node collapse.
    let mut reported = HashSet::new();
    failed.retain(|f| reported.insert((f.scope, f.node.clone(), f.id.clone())));

    let mut result = AggregateResult::new(affected, failed);
    result.queued_tasks = queued;
    Ok(result)
}
