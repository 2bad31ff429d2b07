//! Cluster state assembly
//!
//! Pairs every desired node with the platform objects that currently back it
//! and sets aside whatever the cluster label selects but no desired node
//! claims. Matching is done over immutable listings: each listed object is
//! claimed by at most one node, and the unclaimed rest becomes dangling.

use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::{Resource, ResourceExt};
use tracing::{debug, instrument};

use es_common::{Context, Error};

use crate::client::KubeClient;
use crate::desired::{BackingKind, DesiredNodeState};

/// Platform objects observed for one desired node
///
/// Every field may be absent; a node without a primary object has not been
/// materialized yet.
#[derive(Clone, Debug, Default)]
pub struct ActualNodeState {
    /// Backing Deployment, for data nodes
    pub deployment: Option<Deployment>,
    /// Backing StatefulSet, for all other nodes
    pub stateful_set: Option<StatefulSet>,
    /// ReplicaSet owned by the Deployment
    pub replica_set: Option<ReplicaSet>,
    /// Representative pod
    pub pod: Option<Pod>,
}

impl ActualNodeState {
    /// Name of the primary backing object, if one was matched
    pub fn primary_name(&self) -> Option<String> {
        self.deployment
            .as_ref()
            .map(|d| d.name_any())
            .or_else(|| self.stateful_set.as_ref().map(|s| s.name_any()))
    }

    /// Name of the matched ReplicaSet
    pub fn replica_set_name(&self) -> Option<String> {
        self.replica_set.as_ref().map(|rs| rs.name_any())
    }

    /// Name and phase of the representative pod
    pub fn pod_summary(&self) -> Option<(String, String)> {
        self.pod.as_ref().map(|pod| {
            let phase = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.clone())
                .unwrap_or_default();
            (pod.name_any(), phase)
        })
    }
}

/// One desired node paired with what was found for it
#[derive(Clone, Debug)]
pub struct NodeState {
    /// What the resource spec asks for
    pub desired: DesiredNodeState,
    /// What the platform has
    pub actual: ActualNodeState,
}

/// Snapshot of a cluster for a single reconcile pass
#[derive(Clone, Debug, Default)]
pub struct ClusterState {
    /// Every desired node, in spec order
    pub nodes: Vec<NodeState>,
    /// Deployments no desired node claims
    pub dangling_deployments: Vec<Deployment>,
    /// ReplicaSets not owned by a matched Deployment
    pub dangling_replica_sets: Vec<ReplicaSet>,
    /// Pods not owned by a matched ReplicaSet or StatefulSet
    pub dangling_pods: Vec<Pod>,
    /// Reserved: stray StatefulSets are not collected yet
    pub dangling_stateful_sets: Vec<StatefulSet>,
}

/// Everything the cluster label selects in a namespace
#[derive(Clone, Debug, Default)]
pub struct PlatformSnapshot {
    /// Listed Deployments
    pub deployments: Vec<Deployment>,
    /// Listed StatefulSets
    pub stateful_sets: Vec<StatefulSet>,
    /// Listed ReplicaSets
    pub replica_sets: Vec<ReplicaSet>,
    /// Listed Pods
    pub pods: Vec<Pod>,
}

/// Result of matching listed objects against a list of keys
#[derive(Debug)]
pub struct Matching<T> {
    /// One slot per key, holding the object claimed for it
    pub matched: Vec<Option<T>>,
    /// Objects no key claimed, in listing order
    pub unmatched: Vec<T>,
}

/// Match each object to the first unclaimed key equal to `key_of(object)`
///
/// A `None` key never matches. Each key claims at most one object and each
/// object is claimed at most once.
pub fn match_by_key<T, F>(keys: &[Option<String>], items: Vec<T>, key_of: F) -> Matching<T>
where
    F: Fn(&T) -> Option<String>,
{
    let mut matched: Vec<Option<T>> = keys.iter().map(|_| None).collect();
    let mut unmatched = Vec::new();

    for item in items {
        let slot = key_of(&item).and_then(|key| {
            keys.iter()
                .zip(matched.iter())
                .position(|(want, got)| got.is_none() && want.as_deref() == Some(key.as_str()))
        });
        match slot {
            Some(i) => matched[i] = Some(item),
            None => unmatched.push(item),
        }
    }

    Matching { matched, unmatched }
}

fn controller_name<K: Resource>(obj: &K) -> Option<String> {
    obj.meta()
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller.unwrap_or(false))
        .map(|r| r.name.clone())
}

impl ClusterState {
    /// Build the cluster state from desired nodes and one platform listing
    pub fn from_snapshot(desired: Vec<DesiredNodeState>, snapshot: PlatformSnapshot) -> Self {
        let names_for = |kind: BackingKind| -> Vec<Option<String>> {
            desired
                .iter()
                .map(|d| (d.backing_kind() == kind).then(|| d.deploy_name.clone()))
                .collect()
        };

        let deployments = match_by_key(
            &names_for(BackingKind::Deployment),
            snapshot.deployments,
            |d| Some(d.name_any()),
        );
        let stateful_sets = match_by_key(
            &names_for(BackingKind::StatefulSet),
            snapshot.stateful_sets,
            |s| Some(s.name_any()),
        );

        let deployment_names: Vec<Option<String>> = deployments
            .matched
            .iter()
            .map(|d| d.as_ref().map(|d| d.name_any()))
            .collect();
        let replica_sets = match_by_key(
            &deployment_names,
            snapshot.replica_sets,
            controller_name,
        );

        // Deployment pods are owned by the ReplicaSet, StatefulSet pods directly
        let pod_owners: Vec<Option<String>> = replica_sets
            .matched
            .iter()
            .zip(stateful_sets.matched.iter())
            .map(|(rs, sts)| {
                rs.as_ref()
                    .map(|rs| rs.name_any())
                    .or_else(|| sts.as_ref().map(|s| s.name_any()))
            })
            .collect();
        let pods = match_by_key(&pod_owners, snapshot.pods, controller_name);

        let nodes = desired
            .into_iter()
            .zip(deployments.matched)
            .zip(stateful_sets.matched)
            .zip(replica_sets.matched)
            .zip(pods.matched)
            .map(
                |((((desired, deployment), stateful_set), replica_set), pod)| NodeState {
                    desired,
                    actual: ActualNodeState {
                        deployment,
                        stateful_set,
                        replica_set,
                        pod,
                    },
                },
            )
            .collect();

        Self {
            nodes,
            dangling_deployments: deployments.unmatched,
            dangling_replica_sets: replica_sets.unmatched,
            dangling_pods: pods.unmatched,
            dangling_stateful_sets: Vec::new(),
        }
    }
}

/// List the cluster's objects and assemble its state
#[instrument(skip(kube, desired), fields(cluster = %cluster, namespace = %namespace))]
pub async fn assemble(
    kube: &dyn KubeClient,
    cluster: &str,
    namespace: &str,
    desired: Vec<DesiredNodeState>,
) -> Result<ClusterState, Error> {
    let snapshot = PlatformSnapshot {
        deployments: kube
            .list_deployments(cluster, namespace)
            .await
            .context("listing deployments")?,
        stateful_sets: kube
            .list_stateful_sets(cluster, namespace)
            .await
            .context("listing stateful sets")?,
        replica_sets: kube
            .list_replica_sets(cluster, namespace)
            .await
            .context("listing replica sets")?,
        pods: kube
            .list_pods(cluster, namespace)
            .await
            .context("listing pods")?,
    };

    let state = ClusterState::from_snapshot(desired, snapshot);
    debug!(
        nodes = state.nodes.len(),
        dangling_deployments = state.dangling_deployments.len(),
        dangling_replica_sets = state.dangling_replica_sets.len(),
        dangling_pods = state.dangling_pods.len(),
        "assembled cluster state"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use crate::testing::{
        api_error, cluster, deployment_named, desired_nodes, group, pod_owned_by,
        replica_set_owned_by, stateful_set_named,
    };

    // =========================================================================
    // Matching
    // =========================================================================

    /// Story: listed objects no desired node names become dangling
    #[test]
    fn story_unclaimed_objects_are_dangling() {
        let keys = vec![Some("x".to_string()), Some("y".to_string())];
        let items = vec!["x", "z", "y"];

        let result = match_by_key(&keys, items, |s| Some(s.to_string()));

        assert_eq!(result.matched, vec![Some("x"), Some("y")]);
        assert_eq!(result.unmatched, vec!["z"]);
    }

    /// Story: an object is never claimed twice
    #[test]
    fn story_each_object_claimed_once() {
        let keys = vec![Some("x".to_string()), None, Some("x".to_string())];
        let items = vec!["x", "x", "x"];

        let result = match_by_key(&keys, items, |s| Some(s.to_string()));

        assert_eq!(result.matched, vec![Some("x"), None, Some("x")]);
        assert_eq!(result.unmatched, vec!["x"]);
    }

    // =========================================================================
    // Assembly
    // =========================================================================

    /// Story: deployments, replica sets and pods chain by owner
    #[test]
    fn story_objects_match_transitively() {
        let es = cluster("es", vec![group(&["data"], 2)]);
        let desired = desired_nodes(&es);

        let snapshot = PlatformSnapshot {
            deployments: vec![
                deployment_named("es-data-0-1", 1),
                deployment_named("es-data-0-2", 1),
                deployment_named("es-data-0-3", 1),
            ],
            replica_sets: vec![
                replica_set_owned_by("es-data-0-1-abc", "es-data-0-1"),
                replica_set_owned_by("es-data-0-3-xyz", "es-data-0-3"),
            ],
            pods: vec![
                pod_owned_by("es-data-0-1-abc-1", "es-data-0-1-abc", "Running"),
                pod_owned_by("orphan", "gone", "Running"),
            ],
            ..Default::default()
        };

        let state = ClusterState::from_snapshot(desired, snapshot);

        assert_eq!(state.nodes.len(), 2);
        let first = &state.nodes[0].actual;
        assert_eq!(first.primary_name().as_deref(), Some("es-data-0-1"));
        assert_eq!(first.replica_set_name().as_deref(), Some("es-data-0-1-abc"));
        assert_eq!(
            first.pod_summary(),
            Some(("es-data-0-1-abc-1".to_string(), "Running".to_string()))
        );

        let second = &state.nodes[1].actual;
        assert_eq!(second.primary_name().as_deref(), Some("es-data-0-2"));
        assert!(second.replica_set.is_none());
        assert!(second.pod.is_none());

        let dangling: Vec<_> = state
            .dangling_deployments
            .iter()
            .map(|d| d.name_any())
            .collect();
        assert_eq!(dangling, vec!["es-data-0-3"]);
        assert_eq!(state.dangling_replica_sets.len(), 1);
        assert_eq!(state.dangling_pods.len(), 1);
        assert!(state.dangling_stateful_sets.is_empty());
    }

    /// Story: StatefulSet pods match the StatefulSet directly
    #[test]
    fn story_stateful_set_pods_match_by_owner() {
        let es = cluster("es", vec![group(&["master"], 3)]);
        let desired = desired_nodes(&es);

        let snapshot = PlatformSnapshot {
            stateful_sets: vec![stateful_set_named("es-master-0-1", 3)],
            pods: vec![
                pod_owned_by("es-master-0-1-0", "es-master-0-1", "Running"),
                pod_owned_by("es-master-0-1-1", "es-master-0-1", "Running"),
            ],
            ..Default::default()
        };

        let state = ClusterState::from_snapshot(desired, snapshot);

        assert_eq!(state.nodes.len(), 1);
        let actual = &state.nodes[0].actual;
        assert!(actual.deployment.is_none());
        assert_eq!(actual.primary_name().as_deref(), Some("es-master-0-1"));
        assert_eq!(
            actual.pod_summary().map(|(name, _)| name).as_deref(),
            Some("es-master-0-1-0")
        );
        assert!(state.dangling_deployments.is_empty());
    }

    /// Story: a Deployment named like a StatefulSet-backed node is stray
    #[test]
    fn story_kind_mismatch_is_dangling() {
        let es = cluster("es", vec![group(&["client"], 1)]);
        let desired = desired_nodes(&es);
        let snapshot = PlatformSnapshot {
            deployments: vec![deployment_named("es-client-0-1", 1)],
            ..Default::default()
        };

        let state = ClusterState::from_snapshot(desired, snapshot);

        assert!(state.nodes[0].actual.primary_name().is_none());
        assert_eq!(state.dangling_deployments.len(), 1);
    }

    /// Story: listing failures name the listing that failed
    #[tokio::test]
    async fn story_listing_failure_is_wrapped() {
        let mut mock = MockKubeClient::new();
        mock.expect_list_deployments().returning(|_, _| Ok(vec![]));
        mock.expect_list_stateful_sets().returning(|_, _| Ok(vec![]));
        mock.expect_list_replica_sets().returning(|_, _| {
            Err(api_error(503, "api unavailable"))
        });

        let es = cluster("es", vec![group(&["data"], 1)]);
        let err = assemble(&mock, "es", "logging", desired_nodes(&es))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("listing replica sets: "));
        assert!(err.is_retryable());
    }
}
