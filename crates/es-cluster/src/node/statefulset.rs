//! StatefulSet-backed nodes
//!
//! Client and master groups share one StatefulSet per group. Its replica
//! count is the group's replica count and each pod gets its own claim from
//! the set's claim template.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

use es_common::Error;

use crate::client::KubeClient;
use crate::desired::{DesiredNodeState, STORAGE_VOLUME};
use crate::state::ActualNodeState;

use super::NodeResource;

/// Storage requested when the group has no claim template
pub const DEFAULT_STORAGE_REQUEST: &str = "1Gi";

/// Adapter for StatefulSet-backed nodes
#[derive(Clone, Copy, Debug, Default)]
pub struct StatefulSetNode;

impl StatefulSetNode {
    /// Build the StatefulSet for a node
    pub fn build(
        &self,
        desired: &DesiredNodeState,
        owner: Option<&OwnerReference>,
    ) -> StatefulSet {
        let storage = &desired.node.storage;
        let claim_backed = storage.host_path.is_none()
            && storage.empty_dir.is_none()
            && storage.persistent_volume_claim.is_none();

        let mut volumes = Vec::new();
        if !claim_backed {
            volumes.push(desired.storage_volume().0);
        }
        volumes.extend(desired.config_volumes());

        let claim_templates =
            claim_backed.then(|| vec![claim_template(desired, storage.volume_claim_template.as_ref())]);

        let mut metadata = desired.object_meta();
        metadata.owner_references = owner.map(|o| vec![o.clone()]);

        StatefulSet {
            metadata,
            spec: Some(StatefulSetSpec {
                replicas: Some(desired.replicas()),
                selector: LabelSelector {
                    match_labels: Some(desired.labels()),
                    ..Default::default()
                },
                service_name: desired.deploy_name.clone(),
                template: desired.pod_template(volumes),
                volume_claim_templates: claim_templates,
                ..Default::default()
            }),
            status: None,
        }
    }
}

fn claim_template(
    desired: &DesiredNodeState,
    template: Option<&PersistentVolumeClaim>,
) -> PersistentVolumeClaim {
    let spec = template
        .and_then(|t| t.spec.clone())
        .unwrap_or_else(|| PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(DEFAULT_STORAGE_REQUEST.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        });

    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(STORAGE_VOLUME.to_string()),
            labels: Some(desired.labels()),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

#[async_trait]
impl NodeResource for StatefulSetNode {
    type Object = StatefulSet;

    const KIND: &'static str = "StatefulSet";

    fn observed<'a>(&self, actual: &'a ActualNodeState) -> Option<&'a StatefulSet> {
        actual.stateful_set.as_ref()
    }

    fn replicas(&self, object: &StatefulSet) -> i32 {
        object.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
    }

    async fn fetch(
        &self,
        name: &str,
        namespace: &str,
        kube: &dyn KubeClient,
    ) -> Result<Option<StatefulSet>, Error> {
        kube.get_stateful_set(name, namespace).await
    }

    async fn construct_resource(
        &self,
        desired: &DesiredNodeState,
        owner: Option<&OwnerReference>,
        _kube: &dyn KubeClient,
    ) -> Result<StatefulSet, Error> {
        Ok(self.build(desired, owner))
    }

    async fn create(&self, object: &StatefulSet, kube: &dyn KubeClient) -> Result<(), Error> {
        kube.create_stateful_set(object).await
    }

    async fn update(&self, object: &StatefulSet, kube: &dyn KubeClient) -> Result<(), Error> {
        kube.replace_stateful_set(object).await
    }

    async fn delete(
        &self,
        name: &str,
        namespace: &str,
        kube: &dyn KubeClient,
    ) -> Result<(), Error> {
        kube.delete_stateful_set(name, namespace).await
    }
}
