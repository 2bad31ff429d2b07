//! Elasticsearch reconciliation
//!
//! One pass builds the desired nodes, assembles what the platform has,
//! picks a single action and executes it. Nothing is kept between passes;
//! the next pass starts over from the listing.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument};

use es_common::crd::Elasticsearch;
use es_common::{Context, Error};

use crate::client::{KubeClient, KubeClientImpl};
use crate::desired::build_desired_nodes;
use crate::node::{self, DeploymentNode, NodeResource};
use crate::planner::{plan, RequiredAction};
use crate::services::ensure_services;
use crate::state::{assemble, ClusterState};
use crate::status::update_status;

/// Requeue delay after a pass that changed something
pub const CONVERGING_REQUEUE: Duration = Duration::from_secs(5);

/// Shared state for the Elasticsearch controller
pub struct ClusterContext {
    /// Platform access
    pub kube: Arc<dyn KubeClient>,
    /// Requeue delay once a cluster has converged
    pub requeue_after: Duration,
    /// Requeue delay after a retryable failure
    pub error_requeue_after: Duration,
}

impl ClusterContext {
    /// Create a new ClusterContext with the given dependencies
    pub fn new(
        kube: Arc<dyn KubeClient>,
        requeue_after: Duration,
        error_requeue_after: Duration,
    ) -> Self {
        Self {
            kube,
            requeue_after,
            error_requeue_after,
        }
    }

    /// Create a new ClusterContext from a Kubernetes client
    pub fn from_client(
        client: Client,
        requeue_after: Duration,
        error_requeue_after: Duration,
    ) -> Self {
        Self::new(
            Arc::new(KubeClientImpl::new(client)),
            requeue_after,
            error_requeue_after,
        )
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self::new(kube, Duration::from_secs(60), Duration::from_secs(30))
    }
}

fn namespace_of(es: &Elasticsearch) -> Result<String, Error> {
    es.namespace().ok_or_else(|| {
        Error::validation_for_field(es.name_any(), "metadata.namespace", "must be namespaced")
    })
}

/// Run one reconcile pass over the cluster's workload objects
///
/// Executes at most one action and returns the one it chose.
#[instrument(skip(es, kube), fields(cluster = %es.name_any()))]
pub async fn reconcile_cluster(
    es: &Elasticsearch,
    kube: &dyn KubeClient,
) -> Result<RequiredAction, Error> {
    let name = es.name_any();
    let namespace = namespace_of(es)?;
    let owner = es.controller_owner_ref(&());

    // The config map and service account share the cluster's name
    let desired = build_desired_nodes(es, &name, &name)?;
    let state = assemble(kube, &name, &namespace, desired)
        .await
        .context("building cluster state")?;

    let recorded = es.status.clone().unwrap_or_default();
    let action = plan(&state, &recorded);
    info!(%action, nodes = state.nodes.len(), "selected action");

    execute(action, &name, &namespace, &state, owner.as_ref(), kube).await?;
    Ok(action)
}

async fn execute(
    action: RequiredAction,
    name: &str,
    namespace: &str,
    state: &ClusterState,
    owner: Option<&OwnerReference>,
    kube: &dyn KubeClient,
) -> Result<(), Error> {
    match action {
        // TODO: restart nodes one at a time once readiness gating exists
        RequiredAction::NewClusterNeeded | RequiredAction::RollingRestartNeeded => {
            for node_state in &state.nodes {
                node::create_or_update(&node_state.desired, owner, kube).await?;
            }
        }
        RequiredAction::ScaleDownNeeded => {
            for deployment in &state.dangling_deployments {
                let stray = deployment.name_any();
                DeploymentNode
                    .delete(&stray, namespace, kube)
                    .await
                    .with_context(|| format!("deleting dangling deployment {}", stray))?;
                info!(deployment = %stray, "deleted dangling deployment");
            }
        }
        RequiredAction::StatusUpdateNeeded => {
            update_status(kube, name, namespace, state).await?;
        }
        RequiredAction::None => debug!("cluster converged"),
    }
    Ok(())
}

/// Reconcile an Elasticsearch resource
///
/// Ensures the cluster's Services exist, then runs one pass. Requeues
/// quickly while the pass is still changing things.
#[instrument(skip(es, ctx), fields(cluster = %es.name_any()))]
pub async fn reconcile(es: Arc<Elasticsearch>, ctx: Arc<ClusterContext>) -> Result<Action, Error> {
    let name = es.name_any();
    let namespace = namespace_of(&es)?;
    let owner = es.controller_owner_ref(&());

    ensure_services(ctx.kube.as_ref(), &name, &namespace, owner.as_ref())
        .await
        .context("ensuring services")?;

    let action = reconcile_cluster(&es, ctx.kube.as_ref()).await?;

    if action.is_mutating() {
        Ok(Action::requeue(CONVERGING_REQUEUE))
    } else {
        Ok(Action::requeue(ctx.requeue_after))
    }
}

/// Error policy for the Elasticsearch controller
///
/// Retryable errors requeue after the configured delay; configuration errors
/// wait for the resource to change.
pub fn error_policy(es: Arc<Elasticsearch>, error: &Error, ctx: Arc<ClusterContext>) -> Action {
    error!(
        ?error,
        cluster = %es.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    if error.is_retryable() {
        Action::requeue(ctx.error_requeue_after)
    } else {
        Action::await_change()
    }
}
