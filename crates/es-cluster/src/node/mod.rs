//! Backing resources for logical nodes
//!
//! A node is materialized either as a Deployment (data nodes, one per
//! replica) or as a StatefulSet (every other role-group). Both satisfy
//! [`NodeResource`]; [`DesiredNodeState::backing_kind`] picks one, and the
//! functions at the bottom of this module are the only place that choice is
//! made.

mod deployment;
mod statefulset;

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use tracing::{debug, info, instrument};

use es_common::{Context, Error};

use crate::client::KubeClient;
use crate::desired::{BackingKind, DesiredNodeState};
use crate::state::ActualNodeState;

pub use deployment::DeploymentNode;
pub use statefulset::StatefulSetNode;

/// Query, diff, construct and write one kind of backing resource
#[async_trait]
pub trait NodeResource: Send + Sync {
    /// The platform object type
    type Object: Resource<DynamicType = ()> + Clone + Debug + Send + Sync;

    /// Kind name used in errors and logs
    const KIND: &'static str;

    /// The object of this kind matched for a node, if any
    fn observed<'a>(&self, actual: &'a ActualNodeState) -> Option<&'a Self::Object>;

    /// Replica count recorded on an object
    fn replicas(&self, object: &Self::Object) -> i32;

    /// True if the observed object needs to be rewritten
    ///
    /// Only the replica count is compared.
    fn is_different(&self, observed: &Self::Object, desired: &DesiredNodeState) -> bool {
        self.replicas(observed) != desired.replicas()
    }

    /// Fetch an object by name
    async fn fetch(
        &self,
        name: &str,
        namespace: &str,
        kube: &dyn KubeClient,
    ) -> Result<Option<Self::Object>, Error>;

    /// Fetch the node's object, failing with [`Error::NotFound`] when absent
    async fn query(
        &self,
        desired: &DesiredNodeState,
        kube: &dyn KubeClient,
    ) -> Result<Self::Object, Error> {
        self.fetch(&desired.deploy_name, &desired.namespace, kube)
            .await?
            .ok_or_else(|| Error::not_found(Self::KIND, &desired.deploy_name, &desired.namespace))
    }

    /// Build the full payload for a node, stamping `owner` when given
    async fn construct_resource(
        &self,
        desired: &DesiredNodeState,
        owner: Option<&OwnerReference>,
        kube: &dyn KubeClient,
    ) -> Result<Self::Object, Error>;

    /// Create the object
    async fn create(&self, object: &Self::Object, kube: &dyn KubeClient) -> Result<(), Error>;

    /// Replace the object
    async fn update(&self, object: &Self::Object, kube: &dyn KubeClient) -> Result<(), Error>;

    /// Delete an object by name
    async fn delete(&self, name: &str, namespace: &str, kube: &dyn KubeClient)
        -> Result<(), Error>;
}

fn is_update_needed_with<N: NodeResource>(
    adapter: &N,
    desired: &DesiredNodeState,
    actual: &ActualNodeState,
) -> bool {
    adapter
        .observed(actual)
        .map(|observed| adapter.is_different(observed, desired))
        .unwrap_or(false)
}

async fn create_or_update_with<N: NodeResource>(
    adapter: &N,
    desired: &DesiredNodeState,
    owner: Option<&OwnerReference>,
    kube: &dyn KubeClient,
) -> Result<(), Error> {
    let name = &desired.deploy_name;

    match adapter.query(desired, kube).await {
        Err(e) if e.is_not_found() => {
            let object = adapter
                .construct_resource(desired, owner, kube)
                .await
                .with_context(|| format!("constructing {} {}", N::KIND, name))?;
            match adapter.create(&object, kube).await {
                Ok(()) => info!(kind = N::KIND, node = %name, "created node"),
                Err(e) if e.is_already_exists() => {
                    debug!(kind = N::KIND, node = %name, "node already exists")
                }
                Err(e) => return Err(Error::step(format!("creating node {}", name), e)),
            }
            Ok(())
        }
        Err(e) => Err(Error::step(format!("querying node {}", name), e)),
        Ok(observed) => {
            if !adapter.is_different(&observed, desired) {
                return Ok(());
            }
            let mut object = adapter
                .construct_resource(desired, None, kube)
                .await
                .with_context(|| format!("constructing {} {}", N::KIND, name))?;
            let meta = object.meta_mut();
            meta.resource_version = observed.meta().resource_version.clone();
            meta.owner_references = observed.meta().owner_references.clone();

            adapter
                .update(&object, kube)
                .await
                .with_context(|| format!("updating node {}", name))?;
            info!(
                kind = N::KIND,
                node = %name,
                replicas = desired.replicas(),
                "updated node"
            );
            Ok(())
        }
    }
}

/// True if the node's matched backing object differs from the desired state
///
/// A node with no matched object is not considered here.
pub fn is_update_needed(desired: &DesiredNodeState, actual: &ActualNodeState) -> bool {
    match desired.backing_kind() {
        BackingKind::Deployment => is_update_needed_with(&DeploymentNode, desired, actual),
        BackingKind::StatefulSet => is_update_needed_with(&StatefulSetNode, desired, actual),
    }
}

/// Create the node's backing object, or rewrite it if it differs
///
/// A create that races with another writer counts as success. Updates keep
/// the observed object's owner references rather than re-stamping `owner`.
#[instrument(skip_all, fields(node = %desired.deploy_name))]
pub async fn create_or_update(
    desired: &DesiredNodeState,
    owner: Option<&OwnerReference>,
    kube: &dyn KubeClient,
) -> Result<(), Error> {
    match desired.backing_kind() {
        BackingKind::Deployment => {
            create_or_update_with(&DeploymentNode, desired, owner, kube).await
        }
        BackingKind::StatefulSet => {
            create_or_update_with(&StatefulSetNode, desired, owner, kube).await
        }
    }
}
