//! Kubernetes client abstraction for cluster reconciliation
//!
//! Every platform call made during a reconcile pass goes through
//! [`KubeClient`], so the core can be exercised against a mock or an
//! in-memory fake.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use es_common::crd::{Elasticsearch, ElasticsearchStatus};
use es_common::{cluster_selector, Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for Elasticsearch clusters
///
/// Lookups return `Ok(None)` when the object is absent. Creates that collide
/// with an existing object return [`Error::AlreadyExists`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Deployment by name
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;

    /// Create a Deployment
    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// Replace an existing Deployment
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// Delete a Deployment by name
    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Get a StatefulSet by name
    async fn get_stateful_set(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, Error>;

    /// Create a StatefulSet
    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error>;

    /// Replace an existing StatefulSet
    async fn replace_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error>;

    /// Delete a StatefulSet by name
    async fn delete_stateful_set(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// List Deployments labelled with `cluster=<cluster>`
    async fn list_deployments(&self, cluster: &str, namespace: &str)
        -> Result<Vec<Deployment>, Error>;

    /// List StatefulSets labelled with `cluster=<cluster>`
    async fn list_stateful_sets(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<StatefulSet>, Error>;

    /// List ReplicaSets labelled with `cluster=<cluster>`
    async fn list_replica_sets(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<ReplicaSet>, Error>;

    /// List Pods labelled with `cluster=<cluster>`
    async fn list_pods(&self, cluster: &str, namespace: &str) -> Result<Vec<Pod>, Error>;

    /// Create a PersistentVolumeClaim
    async fn create_persistent_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<(), Error>;

    /// Create a Service
    async fn create_service(&self, service: &Service) -> Result<(), Error>;

    /// Get a Service by name
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;

    /// Patch the status subresource of an Elasticsearch resource
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ElasticsearchStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        match self.api::<K>(namespace).get(name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let namespace = namespace_of(obj)?;
        let name = obj.name_any();
        match self
            .api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
        {
            Ok(_) => {
                debug!(kind = %K::kind(&()), %name, %namespace, "created");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::already_exists(K::kind(&()), name, namespace))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Serialize
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let namespace = namespace_of(obj)?;
        let name = obj.name_any();
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?;
        debug!(kind = %K::kind(&()), %name, %namespace, "replaced");
        Ok(())
    }

    async fn delete<K>(&self, name: &str, namespace: &str) -> Result<(), Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        debug!(kind = %K::kind(&()), %name, %namespace, "deleted");
        Ok(())
    }

    async fn list<K>(&self, cluster: &str, namespace: &str) -> Result<Vec<K>, Error>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
    {
        let params = ListParams::default().labels(&cluster_selector(cluster));
        let list = self.api::<K>(namespace).list(&params).await?;
        Ok(list.items)
    }
}

fn namespace_of<K: Resource<DynamicType = ()>>(obj: &K) -> Result<String, Error> {
    obj.meta().namespace.clone().ok_or_else(|| {
        Error::validation(format!(
            "{} {} has no namespace",
            K::kind(&()),
            obj.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        self.get(name, namespace).await
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.create(deployment).await
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        self.replace(deployment).await
    }

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.delete::<Deployment>(name, namespace).await
    }

    async fn get_stateful_set(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        self.get(name, namespace).await
    }

    async fn create_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error> {
        self.create(stateful_set).await
    }

    async fn replace_stateful_set(&self, stateful_set: &StatefulSet) -> Result<(), Error> {
        self.replace(stateful_set).await
    }

    async fn delete_stateful_set(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.delete::<StatefulSet>(name, namespace).await
    }

    async fn list_deployments(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<Deployment>, Error> {
        self.list(cluster, namespace).await
    }

    async fn list_stateful_sets(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<StatefulSet>, Error> {
        self.list(cluster, namespace).await
    }

    async fn list_replica_sets(
        &self,
        cluster: &str,
        namespace: &str,
    ) -> Result<Vec<ReplicaSet>, Error> {
        self.list(cluster, namespace).await
    }

    async fn list_pods(&self, cluster: &str, namespace: &str) -> Result<Vec<Pod>, Error> {
        self.list(cluster, namespace).await
    }

    async fn create_persistent_volume_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<(), Error> {
        self.create(claim).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), Error> {
        self.create(service).await
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        self.get(name, namespace).await
    }

    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ElasticsearchStatus,
    ) -> Result<(), Error> {
        let api: Api<Elasticsearch> = Api::namespaced(self.client.clone(), namespace);
        let status_patch = serde_json::json!({ "status": status });

        api.patch_status(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}
