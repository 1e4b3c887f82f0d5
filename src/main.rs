use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, ResourceExt};
use shipper::backoff::Backoff;
use shipper::clusterstore::{ClusterStore, KubeConnector};
use shipper::config::ControllerConfig;
use shipper::controller::{error_policy, reconcile, Context};
use shipper::crd::{Application, CapacityTarget, Cluster, InstallationTarget, Release, TrafficTarget};
use shipper::server::{
    create_metrics, run_health_server, shutdown_channel, wait_for_signal, ReadinessState,
    ShutdownReason,
};
use shipper::store::KubeStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Releases named in an Application's history, in its namespace
fn history_refs(app: Application) -> Vec<ObjectRef<Release>> {
    let namespace = app.namespace().unwrap_or_default();
    app.history()
        .iter()
        .map(|name| ObjectRef::new(name).within(&namespace))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting shipper release coordinator");

    // One process-wide crypto provider for the management and cluster clients
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = ControllerConfig::from_env();
    info!(
        secrets_namespace = %config.secrets_namespace,
        health_port = config.health_port,
        resync = ?config.resync_interval,
        "Configuration loaded"
    );

    // Create shutdown channel for coordinated shutdown
    let (shutdown_controller, shutdown_signal) = shutdown_channel();

    // Not ready until every registered cluster has been tried once
    let readiness = ReadinessState::new();

    let metrics = create_metrics()?;
    info!("Prometheus metrics registry initialized");

    let client = match Client::try_default().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create Kubernetes client");
            return Err(e.into());
        }
    };
    info!("Connected to management cluster");

    // Start health server in background
    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_port = config.health_port;
    let health_handle = tokio::spawn(async move {
        if let Err(e) = run_health_server(health_port, health_readiness, health_metrics).await {
            warn!(error = %e, "Health server failed");
        }
    });

    // Cluster client store
    let connector = KubeConnector::new(
        Arc::new(KubeStore::<Secret>::new(client.clone())),
        config.secrets_namespace.clone(),
        config.client_timeout,
        config.cache_sync_timeout,
    );
    let clusters = ClusterStore::new(
        Arc::new(connector),
        Backoff::new(config.cluster_backoff_base, config.cluster_backoff_max),
        shutdown_signal.clone(),
        Some(metrics.clone()),
    );

    // Register what exists now so readiness covers it; the watch takes over
    let cluster_api = Api::<Cluster>::all(client.clone());
    for cluster in cluster_api.list(&ListParams::default()).await?.items {
        clusters.register(cluster);
    }
    let store_handle = tokio::spawn(clusters.clone().run(
        cluster_api,
        Api::<Secret>::namespaced(client.clone(), &config.secrets_namespace),
    ));

    let sync_clusters = clusters.clone();
    let sync_readiness = readiness.clone();
    let mut sync_shutdown = shutdown_signal.clone();
    let readiness_handle = tokio::spawn(async move {
        loop {
            if sync_clusters.is_synced() {
                sync_readiness.set_ready();
                info!(clusters = ?sync_clusters.cluster_names(), "Cluster store synced, controller ready");
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = sync_shutdown.wait() => return,
            }
        }
    });

    let ctx = Arc::new(Context::new(
        client.clone(),
        clusters.clone(),
        Some(metrics.clone()),
        config.resync_interval,
    ));

    // Target status changes and Application history changes both wake the
    // owning Releases
    // Note: error_policy already logs errors, so only successes are logged here
    let controller = Controller::new(Api::<Release>::all(client.clone()), watcher::Config::default())
        .owns(Api::<CapacityTarget>::all(client.clone()), watcher::Config::default())
        .owns(Api::<TrafficTarget>::all(client.clone()), watcher::Config::default())
        .owns(Api::<InstallationTarget>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<Application>::all(client.clone()),
            watcher::Config::default(),
            history_refs,
        )
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Ok((release, _)) = res {
                info!(release = %release, "Reconciled");
            }
        });

    let reason = tokio::select! {
        _ = controller => ShutdownReason::ControllerStopped,
        signal = wait_for_signal() => signal,
    };
    info!(reason = %reason, "Initiating graceful shutdown");
    // Mark not ready so K8s stops sending traffic during shutdown
    readiness.set_not_ready();

    // Stops the registration watch and every per-cluster task
    shutdown_controller.drain_clusters(reason, &clusters);

    info!("Stopping components...");
    if let Err(e) = store_handle.await {
        warn!(error = %e, "Cluster store task failed");
    }
    readiness_handle.abort();
    health_handle.abort();

    info!("shipper coordinator shut down gracefully");
    Ok(())
}
