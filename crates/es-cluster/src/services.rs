//! Cluster Services
//!
//! Two Services front every cluster: `<cluster>-cluster` carries transport
//! traffic between master-eligible nodes, and `<cluster>` exposes the REST
//! API of client nodes. They are created once and never diffed.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, instrument};

use es_common::{
    Context, Error, CLUSTER_PORT, LABEL_CLUSTER, LABEL_NODE_CLIENT, LABEL_NODE_MASTER,
    REST_API_PORT,
};

use crate::client::KubeClient;

/// Service for inter-node transport
pub fn cluster_service(
    cluster: &str,
    namespace: &str,
    owner: Option<&OwnerReference>,
) -> Service {
    service(
        &format!("{}-cluster", cluster),
        cluster,
        namespace,
        CLUSTER_PORT,
        LABEL_NODE_MASTER,
        owner,
    )
}

/// Service for the REST API
pub fn rest_service(cluster: &str, namespace: &str, owner: Option<&OwnerReference>) -> Service {
    service(
        cluster,
        cluster,
        namespace,
        REST_API_PORT,
        LABEL_NODE_CLIENT,
        owner,
    )
}

fn service(
    name: &str,
    cluster: &str,
    namespace: &str,
    port: i32,
    role_label: &str,
    owner: Option<&OwnerReference>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_CLUSTER.to_string(),
                cluster.to_string(),
            )])),
            owner_references: owner.map(|o| vec![o.clone()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([
                (LABEL_CLUSTER.to_string(), cluster.to_string()),
                (role_label.to_string(), "true".to_string()),
            ])),
            ports: Some(vec![ServicePort {
                name: Some(cluster.to_string()),
                port,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Create both Services, tolerating ones that already exist
#[instrument(skip(kube, owner), fields(cluster = %cluster, namespace = %namespace))]
pub async fn ensure_services(
    kube: &dyn KubeClient,
    cluster: &str,
    namespace: &str,
    owner: Option<&OwnerReference>,
) -> Result<Vec<Service>, Error> {
    let mut services = Vec::with_capacity(2);

    for desired in [
        cluster_service(cluster, namespace, owner),
        rest_service(cluster, namespace, owner),
    ] {
        let name = desired.metadata.name.clone().unwrap_or_default();
        match kube.create_service(&desired).await {
            Ok(()) => debug!(service = %name, "created service"),
            Err(e) if e.is_already_exists() => {}
            Err(e) => return Err(Error::step(format!("creating service {}", name), e)),
        }

        let current = kube
            .get_service(&name, namespace)
            .await
            .with_context(|| format!("getting service {}", name))?
            .ok_or_else(|| Error::not_found("Service", &name, namespace))?;
        services.push(current);
    }

    Ok(services)
}
