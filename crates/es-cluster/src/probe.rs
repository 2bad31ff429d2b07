//! Readiness and liveness probe for Elasticsearch containers

use k8s_openapi::api::core::v1::{ExecAction, Probe};

/// Script shipped in the image that checks the local node's health endpoint
pub const READINESS_SCRIPT: &str = "/usr/share/elasticsearch/probe/readiness.sh";

const INITIAL_DELAY_SECONDS: i32 = 10;
const TIMEOUT_SECONDS: i32 = 30;
const PERIOD_SECONDS: i32 = 5;

/// Probe used for both readiness and liveness
pub fn readiness_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![READINESS_SCRIPT.to_string()]),
        }),
        initial_delay_seconds: Some(INITIAL_DELAY_SECONDS),
        timeout_seconds: Some(TIMEOUT_SECONDS),
        period_seconds: Some(PERIOD_SECONDS),
        ..Default::default()
    }
}
