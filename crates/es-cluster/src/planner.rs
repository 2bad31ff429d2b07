//! Action selection
//!
//! Decides the one thing a reconcile pass should do next. Pure: everything
//! it looks at was gathered by the assembler.

use std::fmt;

use es_common::crd::ElasticsearchStatus;

use crate::node::is_update_needed;
use crate::state::{ClusterState, NodeState};

/// The single corrective action chosen for a pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequiredAction {
    /// At least one node has no backing object
    NewClusterNeeded,
    /// Stray Deployments must be removed
    ScaleDownNeeded,
    /// At least one backing object differs from the desired state
    RollingRestartNeeded,
    /// The recorded status no longer describes the cluster
    StatusUpdateNeeded,
    /// Nothing to do
    None,
}

impl RequiredAction {
    /// True for actions that write workload objects
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for RequiredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NewClusterNeeded => "NewClusterNeeded",
            Self::ScaleDownNeeded => "ScaleDownNeeded",
            Self::RollingRestartNeeded => "RollingRestartNeeded",
            Self::StatusUpdateNeeded => "StatusUpdateNeeded",
            Self::None => "None",
        };
        f.write_str(s)
    }
}

/// Choose the action for a pass; the first rule that applies wins
pub fn plan(state: &ClusterState, status: &ElasticsearchStatus) -> RequiredAction {
    if state.nodes.iter().any(|n| n.actual.primary_name().is_none()) {
        return RequiredAction::NewClusterNeeded;
    }
    if state
        .nodes
        .iter()
        .any(|n| is_update_needed(&n.desired, &n.actual))
    {
        return RequiredAction::RollingRestartNeeded;
    }
    if !state.dangling_deployments.is_empty() {
        return RequiredAction::ScaleDownNeeded;
    }
    if state
        .nodes
        .iter()
        .any(|n| is_status_update_needed(n, status))
    {
        return RequiredAction::StatusUpdateNeeded;
    }
    if state.nodes.len() != status.nodes.len() {
        return RequiredAction::StatusUpdateNeeded;
    }
    RequiredAction::None
}

/// True if the recorded status disagrees with what was observed for a node
///
/// A node with a backing object but no recorded entry always disagrees.
/// Absent replica sets or pods are not compared.
pub fn is_status_update_needed(node: &NodeState, status: &ElasticsearchStatus) -> bool {
    let Some(primary) = node.actual.primary_name() else {
        return false;
    };
    let Some(recorded) = status.nodes.iter().find(|s| s.deployment_name == primary) else {
        return true;
    };

    if node.actual.deployment.is_some() {
        match node.actual.replica_set_name() {
            None => return false,
            Some(rs) if rs != recorded.replica_set_name => return true,
            Some(_) => {}
        }
    }

    match node.actual.pod_summary() {
        None => false,
        Some((pod, phase)) => pod != recorded.pod_name || phase != recorded.status,
    }
}
