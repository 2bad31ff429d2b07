//! Common types for the Elasticsearch operator: CRDs, errors, and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod telemetry;

pub use error::{Context, Error};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for server-side patches
pub const FIELD_MANAGER: &str = "elasticsearch-operator";

/// Label key carrying the owning cluster's name
pub const LABEL_CLUSTER: &str = "cluster";

/// Label key carrying `elasticsearch-<cluster>`
pub const LABEL_COMPONENT: &str = "component";

/// Label key set to "true" on pods that hold the client role
pub const LABEL_NODE_CLIENT: &str = "es-node-client";

/// Label key set to "true" on pods that hold the data role
pub const LABEL_NODE_DATA: &str = "es-node-data";

/// Label key set to "true" on pods that hold the master role
pub const LABEL_NODE_MASTER: &str = "es-node-master";

/// Port used for node-to-node transport traffic
pub const CLUSTER_PORT: i32 = 9300;

/// Port serving the Elasticsearch REST API
pub const REST_API_PORT: i32 = 9200;

/// Label selector scoping list calls to one cluster's resources
pub fn cluster_selector(cluster: &str) -> String {
    format!("{}={}", LABEL_CLUSTER, cluster)
}
