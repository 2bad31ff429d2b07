//! Status persistence

use tracing::{info, instrument};

use es_common::crd::{ElasticsearchNodeStatus, ElasticsearchStatus};
use es_common::{Context, Error};

use crate::client::KubeClient;
use crate::state::ClusterState;

/// Summarize every materialized node of the cluster state
pub fn build_status(state: &ClusterState) -> ElasticsearchStatus {
    let nodes = state
        .nodes
        .iter()
        .filter_map(|node| {
            let deployment_name = node.actual.primary_name()?;
            let (pod_name, status) = node.actual.pod_summary().unwrap_or_default();
            Some(ElasticsearchNodeStatus {
                deployment_name,
                replica_set_name: node.actual.replica_set_name().unwrap_or_default(),
                pod_name,
                status,
            })
        })
        .collect();

    ElasticsearchStatus { nodes }
}

/// Rebuild the status from the cluster state and write it
#[instrument(skip(kube, state), fields(cluster = %name, namespace = %namespace))]
pub async fn update_status(
    kube: &dyn KubeClient,
    name: &str,
    namespace: &str,
    state: &ClusterState,
) -> Result<ElasticsearchStatus, Error> {
    let status = build_status(state);
    kube.patch_status(name, namespace, &status)
        .await
        .context("updating cluster status")?;
    info!(nodes = status.nodes.len(), "recorded cluster status");
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use crate::state::PlatformSnapshot;
    use crate::testing::{
        cluster, deployment_named, desired_nodes, group, pod_owned_by, replica_set_owned_by,
    };

    fn partial_cluster() -> ClusterState {
        let desired = desired_nodes(&cluster("es", vec![group(&["data"], 2)]));
        ClusterState::from_snapshot(
            desired,
            PlatformSnapshot {
                deployments: vec![deployment_named("es-data-0-1", 1)],
                replica_sets: vec![replica_set_owned_by("es-data-0-1-abc", "es-data-0-1")],
                pods: vec![pod_owned_by("es-data-0-1-abc-x", "es-data-0-1-abc", "Running")],
                ..Default::default()
            },
        )
    }

    /// Story: only materialized nodes are recorded
    #[test]
    fn story_status_lists_materialized_nodes() {
        let status = build_status(&partial_cluster());

        assert_eq!(status.nodes.len(), 1);
        assert_eq!(
            status.nodes[0],
            ElasticsearchNodeStatus {
                deployment_name: "es-data-0-1".to_string(),
                replica_set_name: "es-data-0-1-abc".to_string(),
                pod_name: "es-data-0-1-abc-x".to_string(),
                status: "Running".to_string(),
            }
        );
    }

    /// Story: the rebuilt status is patched onto the resource
    #[tokio::test]
    async fn story_status_is_patched() {
        let mut mock = MockKubeClient::new();
        mock.expect_patch_status()
            .withf(|name, ns, status| name == "es" && ns == "logging" && status.nodes.len() == 1)
            .times(1)
            .returning(|_, _, _| Ok(()));

        let status = update_status(&mock, "es", "logging", &partial_cluster())
            .await
            .unwrap();
        assert_eq!(status.nodes[0].deployment_name, "es-data-0-1");
    }
}
