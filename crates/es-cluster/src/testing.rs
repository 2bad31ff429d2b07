//! Fixtures shared by unit tests

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, ReplicaSet, StatefulSet, StatefulSetSpec,
};
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use es_common::crd::{Elasticsearch, ElasticsearchNode, ElasticsearchSpec};
use es_common::{Error, LABEL_CLUSTER};

use crate::desired::{build_desired_nodes, DesiredNodeState};

pub const NAMESPACE: &str = "logging";

pub fn cluster(name: &str, nodes: Vec<ElasticsearchNode>) -> Elasticsearch {
    let mut es = Elasticsearch::new(
        name,
        ElasticsearchSpec {
            nodes,
            ..Default::default()
        },
    );
    es.metadata.namespace = Some(NAMESPACE.to_string());
    es.metadata.uid = Some(format!("uid-{}", name));
    es
}

/// API server failure with the given status code
pub fn api_error(code: u16, message: &str) -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: "Test".to_string(),
        code,
    }))
}

pub fn group(roles: &[&str], replicas: i32) -> ElasticsearchNode {
    ElasticsearchNode {
        roles: roles.iter().map(|r| r.to_string()).collect(),
        replicas,
        ..Default::default()
    }
}

pub fn desired_nodes(es: &Elasticsearch) -> Vec<DesiredNodeState> {
    let name = es.metadata.name.clone().unwrap_or_default();
    build_desired_nodes(es, &name, &name).unwrap()
}

pub fn owner_ref(name: &str) -> OwnerReference {
    OwnerReference {
        api_version: "logging.openshift.io/v1alpha1".to_string(),
        kind: "Elasticsearch".to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        controller: Some(true),
        block_owner_deletion: None,
    }
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

fn meta(name: &str, owner: Option<OwnerReference>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(BTreeMap::from([(
            LABEL_CLUSTER.to_string(),
            "es".to_string(),
        )])),
        owner_references: owner.map(|o| vec![o]),
        ..Default::default()
    }
}

pub fn deployment_named(name: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: meta(name, None),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn stateful_set_named(name: &str, replicas: i32) -> StatefulSet {
    StatefulSet {
        metadata: meta(name, None),
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn replica_set_owned_by(name: &str, deployment: &str) -> ReplicaSet {
    ReplicaSet {
        metadata: meta(name, Some(controller_ref("Deployment", deployment))),
        ..Default::default()
    }
}

pub fn pod_owned_by(name: &str, owner: &str, phase: &str) -> Pod {
    Pod {
        metadata: meta(name, Some(controller_ref("ReplicaSet", owner))),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
