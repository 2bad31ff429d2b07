//! Elasticsearch operator - reconciles Elasticsearch clusters on Kubernetes

mod config;

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};

use es_cluster::{error_policy, reconcile, ClusterContext};
use es_common::crd::Elasticsearch;
use es_common::telemetry::{init_telemetry, TelemetryConfig};
use es_common::FIELD_MANAGER;

use config::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.command() == Commands::Crd {
        let crd = serde_yaml::to_string(&Elasticsearch::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
    })?;

    run_controller(&cli).await
}

/// Install the Elasticsearch CRD with server-side apply
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let crd = Elasticsearch::crd();
    let name = crd.name_any();

    tracing::info!(crd = %name, "installing CRD");
    crds.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&crd),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Elasticsearch CRD: {}", e))?;

    Ok(())
}

async fn run_controller(cli: &Cli) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if cli.install_crd {
        ensure_crd_installed(&client).await?;
    }

    let (clusters, deployments, stateful_sets) = match &cli.watch_namespace {
        Some(ns) => (
            Api::<Elasticsearch>::namespaced(client.clone(), ns),
            Api::<Deployment>::namespaced(client.clone(), ns),
            Api::<StatefulSet>::namespaced(client.clone(), ns),
        ),
        None => (
            Api::<Elasticsearch>::all(client.clone()),
            Api::<Deployment>::all(client.clone()),
            Api::<StatefulSet>::all(client.clone()),
        ),
    };

    let ctx = Arc::new(ClusterContext::from_client(
        client,
        cli.requeue_after(),
        cli.error_requeue_after(),
    ));

    tracing::info!(
        namespace = cli.watch_namespace.as_deref().unwrap_or("*"),
        "starting Elasticsearch controller"
    );

    Controller::new(clusters, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(stateful_sets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(cluster = %obj.name, ?action, "reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("controller stopped");
    Ok(())
}
