//! Elasticsearch CRD types
//!
//! An `Elasticsearch` resource declares an ordered list of role-groups. Each
//! group carries a role set, a replica count, an optional resource template,
//! and a storage source. Roles are kept as plain strings on the wire so that
//! an unknown role reaches the desired-state builder and is reported there as
//! a configuration error.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, HostPathVolumeSource, PersistentVolumeClaim,
    PersistentVolumeClaimVolumeSource, ResourceRequirements,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Node template
// =============================================================================

/// Image and compute resources for an Elasticsearch node
///
/// Used both as the cluster-wide template and as a per-group override.
/// Unset fields on a group inherit from the cluster-wide template.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchNodeSpec {
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// CPU/memory limits and requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

// =============================================================================
// Storage
// =============================================================================

/// Where a node keeps its data directory
///
/// The first set field wins, in declaration order. A source with no field set
/// is treated as an empty-dir.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchNodeStorageSource {
    /// Mount a directory from the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,

    /// Scratch space that lives as long as the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,

    /// Template for a claim provisioned per node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_claim_template: Option<PersistentVolumeClaim>,

    /// Pre-existing claim shared by every node of the group
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PersistentVolumeClaimVolumeSource>,
}

// =============================================================================
// Role-group
// =============================================================================

/// One role-group: `replicas` nodes sharing the same roles and template
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchNode {
    /// Node roles, drawn from `client`, `data` and `master`
    #[serde(default)]
    pub roles: Vec<String>,

    /// Number of nodes in this group
    #[serde(default)]
    pub replicas: i32,

    /// Per-group override of the cluster-wide node template
    #[serde(default)]
    pub spec: ElasticsearchNodeSpec,

    /// Data directory source
    #[serde(default)]
    pub storage: ElasticsearchNodeStorageSource,

    /// Node selector applied to the group's pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
}

/// TLS settings for inter-node and REST traffic
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSecure {
    /// Disable TLS and skip mounting certificates
    #[serde(default)]
    pub disabled: bool,

    /// Secret holding the certificates (defaults to the cluster name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates_secret: Option<String>,
}

// =============================================================================
// CRD
// =============================================================================

/// Desired state of an Elasticsearch cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logging.openshift.io",
    version = "v1alpha1",
    kind = "Elasticsearch",
    plural = "elasticsearches",
    shortname = "es",
    namespaced,
    status = "ElasticsearchStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Cluster-wide node template
    #[serde(default)]
    pub spec: ElasticsearchNodeSpec,

    /// Ordered role-groups
    #[serde(default)]
    pub nodes: Vec<ElasticsearchNode>,

    /// TLS settings
    #[serde(default)]
    pub secure: ElasticsearchSecure,
}

impl ElasticsearchSecure {
    /// Name of the certificates secret for `cluster`
    pub fn certificates_secret_for(&self, cluster: &str) -> String {
        self.certificates_secret
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| cluster.to_string())
    }
}

/// Recorded summary of one node's backing resources
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchNodeStatus {
    /// Name of the backing resource
    #[serde(default)]
    pub deployment_name: String,

    /// Name of the replica set owned by the backing resource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replica_set_name: String,

    /// Name of the node's pod
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pod_name: String,

    /// Pod phase (Pending, Running, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

/// Observed state of an Elasticsearch cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchStatus {
    /// One entry per materialized node
    #[serde(default)]
    pub nodes: Vec<ElasticsearchNodeStatus>,
}

// =============================================================================
// Tests
// =============================================================================
