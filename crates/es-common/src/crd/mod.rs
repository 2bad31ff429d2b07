//! Custom Resource Definitions for the Elasticsearch operator

mod elasticsearch;

pub use elasticsearch::{
    Elasticsearch, ElasticsearchNode, ElasticsearchNodeSpec, ElasticsearchNodeStatus,
    ElasticsearchNodeStorageSource, ElasticsearchSecure, ElasticsearchSpec, ElasticsearchStatus,
};
