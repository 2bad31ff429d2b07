//! Deployment-backed nodes
//!
//! Each data replica gets its own single-replica Deployment so it can own
//! its storage claim.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::ResourceExt;
use tracing::{debug, error};

use es_common::Error;

use crate::client::KubeClient;
use crate::desired::DesiredNodeState;
use crate::state::ActualNodeState;

use super::NodeResource;

/// Adapter for Deployment-backed nodes
#[derive(Clone, Copy, Debug, Default)]
pub struct DeploymentNode;

impl DeploymentNode {
    /// Build the Deployment for a node without touching the platform
    pub fn build(&self, desired: &DesiredNodeState, owner: Option<&OwnerReference>) -> Deployment {
        let (storage, _) = desired.storage_volume();
        let mut volumes = vec![storage];
        volumes.extend(desired.config_volumes());

        let mut metadata = desired.object_meta();
        metadata.owner_references = owner.map(|o| vec![o.clone()]);

        Deployment {
            metadata,
            spec: Some(DeploymentSpec {
                replicas: Some(desired.replicas()),
                selector: LabelSelector {
                    match_labels: Some(desired.labels()),
                    ..Default::default()
                },
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    rolling_update: None,
                }),
                template: desired.pod_template(volumes),
                ..Default::default()
            }),
            status: None,
        }
    }
}

#[async_trait]
impl NodeResource for DeploymentNode {
    type Object = Deployment;

    const KIND: &'static str = "Deployment";

    fn observed<'a>(&self, actual: &'a ActualNodeState) -> Option<&'a Deployment> {
        actual.deployment.as_ref()
    }

    fn replicas(&self, object: &Deployment) -> i32 {
        object.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
    }

    async fn fetch(
        &self,
        name: &str,
        namespace: &str,
        kube: &dyn KubeClient,
    ) -> Result<Option<Deployment>, Error> {
        kube.get_deployment(name, namespace).await
    }

    /// Claims requested by a claim template are created here, eagerly.
    /// A failed claim create is logged and does not fail construction.
    async fn construct_resource(
        &self,
        desired: &DesiredNodeState,
        owner: Option<&OwnerReference>,
        kube: &dyn KubeClient,
    ) -> Result<Deployment, Error> {
        if let (_, Some(claim)) = desired.storage_volume() {
            let claim_name = claim.name_any();
            match kube.create_persistent_volume_claim(&claim).await {
                Ok(()) => debug!(claim = %claim_name, node = %desired.deploy_name, "created claim"),
                Err(e) if e.is_already_exists() => {}
                Err(e) => error!(
                    error = %e,
                    claim = %claim_name,
                    node = %desired.deploy_name,
                    "failed to create persistent volume claim"
                ),
            }
        }

        Ok(self.build(desired, owner))
    }

    async fn create(&self, object: &Deployment, kube: &dyn KubeClient) -> Result<(), Error> {
        kube.create_deployment(object).await
    }

    async fn update(&self, object: &Deployment, kube: &dyn KubeClient) -> Result<(), Error> {
        kube.replace_deployment(object).await
    }

    async fn delete(
        &self,
        name: &str,
        namespace: &str,
        kube: &dyn KubeClient,
    ) -> Result<(), Error> {
        kube.delete_deployment(name, namespace).await
    }
}
