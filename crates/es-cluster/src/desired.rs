//! Desired node state derivation
//!
//! Expands every role-group of an `Elasticsearch` spec into one
//! [`DesiredNodeState`] per replica and derives everything a backing
//! resource needs from it: name, labels, anti-affinity, container, and
//! volumes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::{
    Affinity, ConfigMapVolumeSource, Container, ContainerPort, EnvVar,
    EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimVolumeSource,
    PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, ResourceRequirements,
    SecretVolumeSource, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use kube::ResourceExt;
use tracing::debug;

use es_common::crd::{
    Elasticsearch, ElasticsearchNode, ElasticsearchNodeSpec, ElasticsearchNodeStorageSource,
    ElasticsearchSecure,
};
use es_common::{
    Error, CLUSTER_PORT, LABEL_CLUSTER, LABEL_COMPONENT, LABEL_NODE_CLIENT, LABEL_NODE_DATA,
    LABEL_NODE_MASTER, REST_API_PORT,
};

use crate::probe::readiness_probe;

/// Image used when neither the cluster nor the group names one
pub const DEFAULT_IMAGE: &str = "docker.io/t0ffel/elasticsearch5";

/// `INSTANCE_RAM` when no memory limit is set
pub const DEFAULT_MEMORY_LIMIT: &str = "1Gi";

const CERTS_PATH: &str = "/etc/elasticsearch/secret";
const CONFIG_PATH: &str = "/usr/share/java/elasticsearch/config";
const PERSISTENT_PATH: &str = "/elasticsearch/persistent";
const HEAP_DUMP_LOCATION: &str = "/elasticsearch/persistent/heapdump.hprof";
const PROMETHEUS_USER: &str = "prometheus";
const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Volume (and mount) name for the data directory
pub const STORAGE_VOLUME: &str = "elasticsearch-storage";
/// Volume (and mount) name for the config map
pub const CONFIG_VOLUME: &str = "elasticsearch-config";
/// Volume (and mount) name for the certificates secret
pub const CERTS_VOLUME: &str = "certificates";

// =============================================================================
// Roles
// =============================================================================

/// Responsibility of a node within the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Coordinates requests and serves the REST API
    Client,
    /// Holds shards
    Data,
    /// Eligible for cluster-state leadership
    Master,
}

impl Role {
    /// Wire name of the role
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Data => "data",
            Self::Master => "master",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "data" => Ok(Self::Data),
            "master" => Ok(Self::Master),
            other => Err(format!("unknown node role: {}", other)),
        }
    }
}

/// Which platform resource materializes a node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackingKind {
    /// One Deployment per replica, each with its own storage
    Deployment,
    /// One StatefulSet per role-group, scaled in place
    StatefulSet,
}

// =============================================================================
// Desired node state
// =============================================================================

/// Desired state of one logical node: one replica of one role-group
#[derive(Clone, Debug, PartialEq)]
pub struct DesiredNodeState {
    /// Name of the owning Elasticsearch resource
    pub cluster_name: String,
    /// Namespace of the owning Elasticsearch resource
    pub namespace: String,
    /// Name of the backing resource
    pub deploy_name: String,
    /// Roles, sorted
    pub roles: Vec<Role>,
    /// Role-group with its node spec resolved against the cluster template
    pub node: ElasticsearchNode,
    /// TLS settings
    pub secure: ElasticsearchSecure,
    /// Index of the role-group in the cluster spec
    pub node_num: usize,
    /// Replica index within the role-group, starting at 1
    pub replica_num: i32,
    /// Service account the pods run under
    pub service_account_name: String,
    /// Config map mounted as the Elasticsearch config directory
    pub config_map_name: String,
}

/// Expand an Elasticsearch spec into one desired state per node
///
/// Data groups yield one node per replica. Other groups yield a single node
/// whose backing StatefulSet carries the group's replica count.
///
/// Fails before producing anything if a role-group has no roles or names a
/// role outside `client`, `data`, `master`.
pub fn build_desired_nodes(
    es: &Elasticsearch,
    config_map_name: &str,
    service_account_name: &str,
) -> Result<Vec<DesiredNodeState>, Error> {
    let cluster_name = es.name_any();
    let namespace = es.namespace().ok_or_else(|| {
        Error::validation_for_field(&cluster_name, "metadata.namespace", "must be namespaced")
    })?;

    let mut nodes = Vec::new();
    for (node_num, group) in es.spec.nodes.iter().enumerate() {
        let roles = parse_roles(&cluster_name, node_num, &group.roles)?;
        let resolved = ElasticsearchNode {
            spec: resolve_node_spec(&es.spec.spec, &group.spec),
            ..group.clone()
        };

        // A StatefulSet scales in place, so only data groups fan out per replica
        let instances = if roles.contains(&Role::Data) {
            group.replicas
        } else {
            group.replicas.min(1)
        };
        for replica_num in 1..=instances {
            nodes.push(DesiredNodeState {
                cluster_name: cluster_name.clone(),
                namespace: namespace.clone(),
                deploy_name: deploy_name(&cluster_name, &roles, node_num, replica_num),
                roles: roles.clone(),
                node: resolved.clone(),
                secure: es.spec.secure.clone(),
                node_num,
                replica_num,
                service_account_name: service_account_name.to_string(),
                config_map_name: config_map_name.to_string(),
            });
        }
    }

    debug!(cluster = %cluster_name, nodes = nodes.len(), "built desired node states");
    Ok(nodes)
}

fn parse_roles(cluster: &str, node_num: usize, roles: &[String]) -> Result<Vec<Role>, Error> {
    let field = format!("spec.nodes[{}].roles", node_num);
    if roles.is_empty() {
        return Err(Error::validation_for_field(
            cluster,
            field,
            "no node roles specified",
        ));
    }
    let mut parsed = roles
        .iter()
        .map(|r| r.parse::<Role>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|msg| Error::validation_for_field(cluster, &field, msg))?;
    parsed.sort();
    Ok(parsed)
}

/// Deterministic backing resource name for a node
///
/// `<cluster>-<roles>-<group>-<replica>`, where roles are sorted before being
/// concatenated so their order in the cluster spec never affects the name.
pub fn deploy_name(cluster: &str, roles: &[Role], node_num: usize, replica_num: i32) -> String {
    let mut names: Vec<&str> = roles.iter().map(Role::as_str).collect();
    names.sort_unstable();

    format!("{}-{}-{}-{}", cluster, names.concat(), node_num, replica_num)
}

/// Resolve a group's node spec against the cluster-wide template
///
/// Field-wise: the group's image wins when set, and each resource limit or
/// request the group names overrides the template's entry for that resource.
pub fn resolve_node_spec(
    common: &ElasticsearchNodeSpec,
    node: &ElasticsearchNodeSpec,
) -> ElasticsearchNodeSpec {
    let image = node
        .image
        .clone()
        .filter(|i| !i.is_empty())
        .or_else(|| common.image.clone().filter(|i| !i.is_empty()));

    ElasticsearchNodeSpec {
        image,
        resources: merge_resources(common.resources.as_ref(), node.resources.as_ref()),
    }
}

fn merge_resources(
    common: Option<&ResourceRequirements>,
    node: Option<&ResourceRequirements>,
) -> Option<ResourceRequirements> {
    match (common, node) {
        (None, None) => None,
        (Some(c), None) => Some(c.clone()),
        (None, Some(n)) => Some(n.clone()),
        (Some(c), Some(n)) => Some(ResourceRequirements {
            limits: merge_quantities(c.limits.as_ref(), n.limits.as_ref()),
            requests: merge_quantities(c.requests.as_ref(), n.requests.as_ref()),
            ..n.clone()
        }),
    }
}

fn merge_quantities(
    common: Option<&BTreeMap<String, Quantity>>,
    node: Option<&BTreeMap<String, Quantity>>,
) -> Option<BTreeMap<String, Quantity>> {
    match (common, node) {
        (None, None) => None,
        (c, n) => {
            let mut merged = c.cloned().unwrap_or_default();
            merged.extend(n.cloned().unwrap_or_default());
            Some(merged)
        }
    }
}

impl DesiredNodeState {
    /// True if the node holds the master role
    pub fn is_master(&self) -> bool {
        self.roles.contains(&Role::Master)
    }

    /// True if the node holds the data role
    pub fn is_data(&self) -> bool {
        self.roles.contains(&Role::Data)
    }

    /// True if the node holds the client role
    pub fn is_client(&self) -> bool {
        self.roles.contains(&Role::Client)
    }

    /// Backing resource kind for this node
    ///
    /// Data nodes need individually addressable storage, so each replica gets
    /// its own Deployment. Other roles share one StatefulSet per group.
    pub fn backing_kind(&self) -> BackingKind {
        if self.is_data() {
            BackingKind::Deployment
        } else {
            BackingKind::StatefulSet
        }
    }

    /// Replica count recorded on the backing resource
    pub fn replicas(&self) -> i32 {
        if self.is_data() {
            1
        } else {
            self.node.replicas
        }
    }

    /// Labels stamped on the backing resource, its selector, and its pods
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                LABEL_COMPONENT.to_string(),
                format!("elasticsearch-{}", self.cluster_name),
            ),
            (LABEL_NODE_CLIENT.to_string(), self.is_client().to_string()),
            (LABEL_NODE_DATA.to_string(), self.is_data().to_string()),
            (LABEL_NODE_MASTER.to_string(), self.is_master().to_string()),
            (LABEL_CLUSTER.to_string(), self.cluster_name.clone()),
        ])
    }

    /// Metadata for the backing resource
    pub fn object_meta(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.deploy_name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels()),
            ..Default::default()
        }
    }

    /// Preferred spread across hosts of pods sharing any of this node's roles
    pub fn affinity(&self) -> Affinity {
        let role_labels = [
            (self.is_client(), LABEL_NODE_CLIENT),
            (self.is_data(), LABEL_NODE_DATA),
            (self.is_master(), LABEL_NODE_MASTER),
        ];
        let match_expressions = role_labels
            .into_iter()
            .filter(|(has, _)| *has)
            .map(|(_, key)| LabelSelectorRequirement {
                key: key.to_string(),
                operator: "In".to_string(),
                values: Some(vec!["true".to_string()]),
            })
            .collect();

        Affinity {
            pod_anti_affinity: Some(PodAntiAffinity {
                preferred_during_scheduling_ignored_during_execution: Some(vec![
                    WeightedPodAffinityTerm {
                        weight: 100,
                        pod_affinity_term: PodAffinityTerm {
                            label_selector: Some(LabelSelector {
                                match_expressions: Some(match_expressions),
                                match_labels: None,
                            }),
                            topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                            ..Default::default()
                        },
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Memory limit handed to the JVM sizing scripts
    pub fn instance_ram(&self) -> String {
        self.node
            .spec
            .resources
            .as_ref()
            .and_then(|r| r.limits.as_ref())
            .and_then(|l| l.get("memory"))
            .map(|q| q.0.clone())
            .filter(|q| !is_zero_quantity(q))
            .unwrap_or_else(|| DEFAULT_MEMORY_LIMIT.to_string())
    }

    /// Environment of the Elasticsearch container
    pub fn env_vars(&self) -> Vec<EnvVar> {
        let mut env = vec![
            env_var("DC_NAME", &self.deploy_name),
            EnvVar {
                name: "NAMESPACE".to_string(),
                value_from: Some(EnvVarSource {
                    field_ref: Some(ObjectFieldSelector {
                        field_path: "metadata.namespace".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];
        env.extend([
            env_var("KUBERNETES_TRUST_CERT", "true"),
            env_var("SERVICE_DNS", &format!("{}-cluster", self.cluster_name)),
            env_var("CLUSTER_NAME", &self.cluster_name),
            env_var("INSTANCE_RAM", &self.instance_ram()),
            env_var("HEAP_DUMP_LOCATION", HEAP_DUMP_LOCATION),
            env_var("NODE_QUORUM", "1"),
            env_var("RECOVER_EXPECTED_NODES", "1"),
            env_var("RECOVER_AFTER_TIME", "5m"),
            env_var("READINESS_PROBE_TIMEOUT", "30"),
            env_var("POD_LABEL", &format!("cluster={}", self.cluster_name)),
            env_var("IS_MASTER", &self.is_master().to_string()),
            env_var("HAS_DATA", &self.is_data().to_string()),
            env_var("PROMETHEUS_USER", PROMETHEUS_USER),
            env_var("PRIMARY_SHARDS", "1"),
            env_var("REPLICA_SHARDS", "0"),
        ]);
        env
    }

    /// Mounts for storage, config and (when TLS is on) certificates
    pub fn volume_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![
            volume_mount(STORAGE_VOLUME, PERSISTENT_PATH),
            volume_mount(CONFIG_VOLUME, CONFIG_PATH),
        ];
        if !self.secure.disabled {
            mounts.push(volume_mount(CERTS_VOLUME, CERTS_PATH));
        }
        mounts
    }

    /// The single Elasticsearch container
    pub fn container(&self) -> Container {
        let image = self
            .node
            .spec
            .image
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string());
        let probe = readiness_probe();

        Container {
            name: "elasticsearch".to_string(),
            image: Some(image),
            image_pull_policy: Some("IfNotPresent".to_string()),
            env: Some(self.env_vars()),
            ports: Some(vec![
                container_port("cluster", CLUSTER_PORT),
                container_port("restapi", REST_API_PORT),
            ]),
            readiness_probe: Some(probe.clone()),
            liveness_probe: Some(probe),
            volume_mounts: Some(self.volume_mounts()),
            resources: self.node.spec.resources.clone(),
            ..Default::default()
        }
    }

    /// Config map volume plus the certificates secret when TLS is on
    pub fn config_volumes(&self) -> Vec<Volume> {
        let mut volumes = vec![Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: self.config_map_name.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }];
        if !self.secure.disabled {
            volumes.push(Volume {
                name: CERTS_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(self.secure.certificates_secret_for(&self.cluster_name)),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        volumes
    }

    /// Name of the claim provisioned for this node from a claim template
    pub fn claim_name(&self, template: &PersistentVolumeClaim) -> String {
        format!(
            "{}-{}",
            template.metadata.name.as_deref().unwrap_or(STORAGE_VOLUME),
            self.deploy_name
        )
    }

    /// Resolve the storage source into the `elasticsearch-storage` volume
    ///
    /// For a claim template, also returns the claim this node needs; the
    /// caller is responsible for creating it.
    pub fn storage_volume(&self) -> (Volume, Option<PersistentVolumeClaim>) {
        let storage: &ElasticsearchNodeStorageSource = &self.node.storage;
        let volume = Volume {
            name: STORAGE_VOLUME.to_string(),
            ..Default::default()
        };

        if let Some(host_path) = &storage.host_path {
            return (
                Volume {
                    host_path: Some(host_path.clone()),
                    ..volume
                },
                None,
            );
        }
        if storage.empty_dir.is_none() {
            if let Some(template) = &storage.volume_claim_template {
                let claim_name = self.claim_name(template);
                let claim = PersistentVolumeClaim {
                    metadata: ObjectMeta {
                        name: Some(claim_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        labels: Some(self.labels()),
                        ..Default::default()
                    },
                    spec: template.spec.clone(),
                    ..Default::default()
                };
                return (
                    Volume {
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name,
                            read_only: None,
                        }),
                        ..volume
                    },
                    Some(claim),
                );
            }
            if let Some(claim) = &storage.persistent_volume_claim {
                return (
                    Volume {
                        persistent_volume_claim: Some(claim.clone()),
                        ..volume
                    },
                    None,
                );
            }
        }

        (
            Volume {
                empty_dir: Some(storage.empty_dir.clone().unwrap_or_default()),
                ..volume
            },
            None,
        )
    }

    /// Pod template shared by both backing kinds
    pub fn pod_template(&self, volumes: Vec<Volume>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                affinity: Some(self.affinity()),
                containers: vec![self.container()],
                volumes: Some(volumes),
                node_selector: self.node.node_selector.clone().filter(|s| !s.is_empty()),
                service_account_name: Some(self.service_account_name.clone())
                    .filter(|s| !s.is_empty()),
                ..Default::default()
            }),
        }
    }
}

/// True for an empty quantity or one whose value is zero in any unit
fn is_zero_quantity(qty: &str) -> bool {
    const SUFFIXES: [&str; 12] = [
        "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "M", "G", "T", "P", "E",
    ];

    let number = SUFFIXES
        .iter()
        .find_map(|s| qty.strip_suffix(s))
        .unwrap_or(qty);
    number.is_empty() || number.parse::<f64>().is_ok_and(|n| n == 0.0)
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}
