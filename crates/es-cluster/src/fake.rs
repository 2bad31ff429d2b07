//! In-memory platform for pipeline tests
//!
//! Stores objects per name, enforces create/replace existence rules the way
//! the API server does, and counts every write the operator issues.
//! [`FakeKube::materialize`] stands in for the workload controllers by giving
//! each Deployment a ReplicaSet and pod, and each StatefulSet its pods.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, PodStatus, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use es_common::crd::ElasticsearchStatus;
use es_common::{Error, LABEL_CLUSTER};

use crate::client::KubeClient;

#[derive(Default)]
struct FakeState {
    deployments: BTreeMap<String, Deployment>,
    stateful_sets: BTreeMap<String, StatefulSet>,
    replica_sets: BTreeMap<String, ReplicaSet>,
    pods: BTreeMap<String, Pod>,
    claims: BTreeMap<String, PersistentVolumeClaim>,
    services: BTreeMap<String, Service>,
    status: Option<ElasticsearchStatus>,
}

/// In-memory [`KubeClient`]
#[derive(Default)]
pub struct FakeKube {
    state: Mutex<FakeState>,
    mutations: AtomicUsize,
}

fn in_cluster<K: Resource>(obj: &K, cluster: &str, namespace: &str) -> bool {
    obj.meta().namespace.as_deref() == Some(namespace)
        && obj
            .meta()
            .labels
            .as_ref()
            .and_then(|l| l.get(LABEL_CLUSTER))
            .map(String::as_str)
            == Some(cluster)
}

fn owned_by<K: Resource>(obj: &K, owner: &str) -> bool {
    obj.meta()
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.name == owner))
}

fn controller_ref(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn running_pod(name: &str, owner: OwnerReference, template: &ObjectMeta) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: template.namespace.clone(),
            labels: template.labels.clone(),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of writes issued so far
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn status(&self) -> Option<ElasticsearchStatus> {
        self.state.lock().unwrap().status.clone()
    }

    pub fn deployment_names(&self) -> Vec<String> {
        self.state.lock().unwrap().deployments.keys().cloned().collect()
    }

    pub fn stateful_set_names(&self) -> Vec<String> {
        self.state.lock().unwrap().stateful_sets.keys().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        self.state.lock().unwrap().services.keys().cloned().collect()
    }

    pub fn stateful_set_replicas(&self, name: &str) -> Option<i32> {
        self.state
            .lock()
            .unwrap()
            .stateful_sets
            .get(name)
            .and_then(|s| s.spec.as_ref())
            .and_then(|s| s.replicas)
    }

    /// Create the ReplicaSets and pods the workload controllers would
    pub fn materialize(&self) {
        let mut state = self.state.lock().unwrap();

        let deployments: Vec<Deployment> = state.deployments.values().cloned().collect();
        for deployment in deployments {
            let name = deployment.name_any();
            let rs_name = format!("{}-5d8f", name);
            if state.replica_sets.contains_key(&rs_name) {
                continue;
            }
            let template = deployment.metadata.clone();
            state.replica_sets.insert(
                rs_name.clone(),
                ReplicaSet {
                    metadata: ObjectMeta {
                        name: Some(rs_name.clone()),
                        owner_references: Some(vec![controller_ref("Deployment", &name)]),
                        ..template.clone()
                    },
                    ..Default::default()
                },
            );
            let pod_name = format!("{}-x2x", rs_name);
            let pod = running_pod(&pod_name, controller_ref("ReplicaSet", &rs_name), &template);
            state.pods.insert(pod_name, pod);
        }

        let stateful_sets: Vec<StatefulSet> = state.stateful_sets.values().cloned().collect();
        for sts in stateful_sets {
            let name = sts.name_any();
            let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
            for ordinal in 0..replicas {
                let pod_name = format!("{}-{}", name, ordinal);
                let owner = controller_ref("StatefulSet", &name);
                let pod = running_pod(&pod_name, owner, &sts.metadata);
                state.pods.entry(pod_name).or_insert(pod);
            }
        }
    }

    fn create_in<K: Resource<DynamicType = ()> + Clone>(
        &self,
        store: impl FnOnce(&mut FakeState) -> &mut BTreeMap<String, K>,
        obj: &K,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let name = obj.name_any();
        let objects = store(&mut *state);
        if objects.contains_key(&name) {
            return Err(Error::already_exists(
                K::kind(&()),
                name,
                obj.namespace().unwrap_or_default(),
            ));
        }
        objects.insert(name, obj.clone());
        self.record();
        Ok(())
    }

    fn replace_in<K: Resource<DynamicType = ()> + Clone>(
        &self,
        store: impl FnOnce(&mut FakeState) -> &mut BTreeMap<String, K>,
        obj: &K,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let name = obj.name_any();
        let objects = store(&mut *state);
        if !objects.contains_key(&name) {
            return Err(Error::not_found(
                K::kind(&()),
                name,
                obj.namespace().unwrap_or_default(),
            ));
        }
        objects.insert(name, obj.clone());
        self.record();
        Ok(())
    }

    /// Remove an object and, like background deletion, everything it owns
    fn delete_cascading(&self, kind: &str, name: &str, namespace: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let removed = match kind {
            "Deployment" => state.deployments.remove(name).is_some(),
            _ => state.stateful_sets.remove(name).is_some(),
        };
        if !removed {
            return Err(Error::not_found(kind, name, namespace));
        }

        let owned: Vec<String> = state
            .replica_sets
            .values()
            .filter(|rs| owned_by(*rs, name))
            .map(|rs| rs.name_any())
            .collect();
        state.replica_sets.retain(|_, rs| !owned_by(&*rs, name));
        state.pods.retain(|_, pod| {
            !owned_by(&*pod, name) && !owned.iter().any(|rs| owned_by(&*pod, rs))
        });

        self.record();
        Ok(())
    }
}

#[async_trait]
impl KubeClient for FakeKube {
    async fn get_deployment(
        &self,
        name: &str,
        _namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self.state.lock().unwrap().deployments.get(name).cloned())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.create_in(|s| &mut s.deployments, deployment)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.replace_in(|s| &mut s.deployments, deployment)
    }

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.delete_cascading("Deployment", name, namespace)
    }

    async fn get_stateful_set(
        &self,
        name: &str,
        _namespace: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        Ok(self.state.lock().unwrap().stateful_sets.get(name).cloned())
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error> {
        self.create_in(|s| &mut s.stateful_sets, stateful_set)
    }

    async fn replace_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error> {
        self.replace_in(|s| &mut s.stateful_sets, stateful_set)
    }

    async fn delete_stateful_set(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.delete_cascading("StatefulSet", name, namespace)
    }

    async fn list_deployments(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<Deployment>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deployments
            .values()
            .filter(|d| in_cluster(*d, cluster, namespace))
            .cloned()
            .collect())
    }

    async fn list_stateful_sets(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<StatefulSet>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .stateful_sets
            .values()
            .filter(|s| in_cluster(*s, cluster, namespace))
            .cloned()
            .collect())
    }

    async fn list_replica_sets(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<ReplicaSet>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .replica_sets
            .values()
            .filter(|rs| in_cluster(*rs, cluster, namespace))
            .cloned()
            .collect())
    }

    async fn list_pods(&self, cluster: &str, namespace: &str) -> Result<Vec<Pod>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .values()
            .filter(|p| in_cluster(*p, cluster, namespace))
            .cloned()
            .collect())
    }

    async fn create_persistent_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<(), Error> {
        self.create_in(|s| &mut s.claims, claim)
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        self.create_in(|s| &mut s.services, service)
    }

    async fn get_service(&self, name: &str, _namespace: &str) -> Result<Option<Service>, Error> {
        Ok(self.state.lock().unwrap().services.get(name).cloned())
    }

    async fn patch_status(
        &self,
        _name: &str,
        _namespace: &str,
        status: &ElasticsearchStatus,
    ) -> Result<(), Error> {
        self.state.lock().unwrap().status = Some(status.clone());
        self.record();
        Ok(())
    }
}
