//! Reconciliation core for Elasticsearch clusters
//!
//! A reconcile pass runs bottom-up through these modules:
//! - `desired`: one desired state per logical node from the cluster spec
//! - `state`: pairs desired nodes with listed platform objects
//! - `planner`: picks the single action the pass will take
//! - `reconciler`: executes it through the `node` adapters, `status`
//!   persistence, or dangling-object deletion

#![deny(missing_docs)]

pub mod client;
pub mod desired;
pub mod node;
pub mod planner;
pub mod probe;
pub mod reconciler;
pub mod services;
pub mod state;
pub mod status;

#[cfg(test)]
mod fake;
#[cfg(test)]
mod testing;

pub use client::{KubeClient, KubeClientImpl};
pub use desired::{build_desired_nodes, BackingKind, DesiredNodeState, Role};
pub use planner::{plan, RequiredAction};
pub use reconciler::{error_policy, reconcile, reconcile_cluster, ClusterContext};
pub use state::{ActualNodeState, ClusterState, NodeState};

pub use es_common::{Error, Result};
