//! Cluster Client Store
//!
//! Holds one live client and workload cache per registered application
//! cluster. Registration follows the `Cluster` watch; every cluster connects
//! in its own task so a broken cluster only ever affects itself.
//!
//! Lookups never wait: a cluster that is still connecting answers
//! `ClusterNotReady`. Reconnects (credential rotation, spec change) keep
//! serving the previous client until the new one is ready.

pub mod connector;

pub use connector::{ClusterClient, ClusterConnector, ConnectError, KubeConnector};

use crate::backoff::Backoff;
use crate::crd::{Cluster, SKIP_TLS_VERIFY_ANNOTATION};
use crate::server::{SharedMetrics, ShutdownSignal};
use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterStoreError {
    #[error("cluster {cluster:?} is not registered (requested by {agent})")]
    ClusterUnknown { cluster: String, agent: String },

    #[error("cluster {cluster:?} is not ready (requested by {agent}): {}", .last_error.as_deref().unwrap_or("connecting"))]
    ClusterNotReady {
        cluster: String,
        agent: String,
        last_error: Option<String>,
    },
}

struct ClusterSlot {
    /// Connection attempt currently allowed to publish into this slot
    generation: u64,
    cluster: Cluster,
    fingerprint: String,
    client: Option<ClusterClient>,
    attempts: u32,
    last_error: Option<String>,
    task: Option<AbortHandle>,
}

impl Drop for ClusterSlot {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// What a Cluster change must trigger a reconnect on
fn fingerprint(cluster: &Cluster) -> String {
    let spec = serde_json::to_string(&cluster.spec).unwrap_or_default();
    let skip_tls = cluster
        .annotations()
        .get(SKIP_TLS_VERIFY_ANNOTATION)
        .cloned()
        .unwrap_or_default();
    format!("{spec}|{skip_tls}")
}

pub struct ClusterStore {
    slots: DashMap<String, ClusterSlot>,
    /// Last seen resourceVersion per credentials Secret, kept across
    /// (de)registration so a Secret seen before its Cluster still counts
    secret_versions: DashMap<String, String>,
    connector: Arc<dyn ClusterConnector>,
    backoff: Backoff,
    generation: AtomicU64,
    shutdown: ShutdownSignal,
    metrics: Option<SharedMetrics>,
}

impl ClusterStore {
    pub fn new(
        connector: Arc<dyn ClusterConnector>,
        backoff: Backoff,
        shutdown: ShutdownSignal,
        metrics: Option<SharedMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            slots: DashMap::new(),
            secret_versions: DashMap::new(),
            connector,
            backoff,
            generation: AtomicU64::new(0),
            shutdown,
            metrics,
        })
    }

    /// Ready client for `cluster`, on behalf of `agent`
    pub fn get_client(&self, cluster: &str, agent: &str) -> Result<ClusterClient, ClusterStoreError> {
        let Some(slot) = self.slots.get(cluster) else {
            debug!(cluster = %cluster, agent = %agent, "Client requested for unknown cluster");
            return Err(ClusterStoreError::ClusterUnknown {
                cluster: cluster.to_string(),
                agent: agent.to_string(),
            });
        };

        match &slot.client {
            Some(client) => {
                debug!(cluster = %cluster, agent = %agent, "Serving cluster client");
                Ok(client.clone())
            }
            None => {
                debug!(cluster = %cluster, agent = %agent, "Client requested for cluster that is not ready");
                Err(ClusterStoreError::ClusterNotReady {
                    cluster: cluster.to_string(),
                    agent: agent.to_string(),
                    last_error: slot.last_error.clone(),
                })
            }
        }
    }

    /// Registered cluster names, sorted
    pub fn cluster_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_ready(&self, cluster: &str) -> bool {
        self.slots
            .get(cluster)
            .is_some_and(|slot| slot.client.is_some())
    }

    /// True once every registered cluster finished at least one connection attempt
    pub fn is_synced(&self) -> bool {
        self.slots.iter().all(|slot| slot.attempts > 0)
    }

    /// Add a cluster, or reconnect it if its spec or TLS override changed
    pub fn register(self: &Arc<Self>, cluster: Cluster) {
        let name = cluster.name_any();
        let fingerprint = fingerprint(&cluster);

        if let Some(slot) = self.slots.get(&name) {
            if slot.fingerprint == fingerprint {
                return;
            }
        }

        info!(cluster = %name, "Registering cluster");
        self.start_generation(&name, cluster, fingerprint);
    }

    /// Reconnect a cluster after its credentials Secret changed
    ///
    /// The first sighting of a Secret is only recorded: a cluster registered
    /// afterwards reads the Secret as it is now.
    pub fn credentials_changed(self: &Arc<Self>, secret: &Secret) {
        let name = secret.name_any();
        let Some(version) = secret.resource_version() else {
            return;
        };

        let previous = self.secret_versions.insert(name.clone(), version.clone());
        if previous.is_none() || previous.as_ref() == Some(&version) {
            return;
        }

        let cluster = match self.slots.get(&name) {
            Some(slot) => (slot.cluster.clone(), slot.fingerprint.clone()),
            None => {
                debug!(cluster = %name, "Credentials changed for unregistered cluster");
                return;
            }
        };

        info!(cluster = %name, "Cluster credentials changed, reconnecting");
        self.start_generation(&name, cluster.0, cluster.1);
    }

    /// Tear down one cluster's client, cache and connection task
    pub fn deregister(&self, cluster: &str) {
        if self.slots.remove(cluster).is_some() {
            info!(cluster = %cluster, "Deregistered cluster");
            if let Some(metrics) = &self.metrics {
                metrics.remove_cluster(cluster);
            }
        }
    }

    /// Stop every per-cluster task and drop every client
    pub fn stop_all(&self) {
        let names = self.cluster_names();
        self.slots.clear();
        info!(clusters = names.len(), "Cluster store stopped");
    }

    fn start_generation(self: &Arc<Self>, name: &str, cluster: Cluster, fingerprint: String) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // The slot must carry the new generation before the task can publish
        match self.slots.get_mut(name) {
            Some(mut slot) => {
                if let Some(task) = slot.task.take() {
                    task.abort();
                }
                slot.generation = generation;
                slot.cluster = cluster.clone();
                slot.fingerprint = fingerprint;
            }
            None => {
                self.slots.insert(
                    name.to_string(),
                    ClusterSlot {
                        generation,
                        cluster: cluster.clone(),
                        fingerprint,
                        client: None,
                        attempts: 0,
                        last_error: None,
                        task: None,
                    },
                );
                if let Some(metrics) = &self.metrics {
                    metrics.set_cluster_ready(name, false);
                }
            }
        }

        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            store.connect_loop(cluster, generation).await;
        });

        match self.slots.get_mut(name) {
            Some(mut slot) if slot.generation == generation => {
                slot.task = Some(handle.abort_handle());
            }
            _ => handle.abort(),
        }
    }

    async fn connect_loop(self: Arc<Self>, cluster: Cluster, generation: u64) {
        let name = cluster.name_any();
        let mut shutdown = self.shutdown.clone();
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_shutdown() {
                return;
            }

            let result = self.connector.connect(&cluster).await;

            let failure = {
                let mut slot = match self.slots.get_mut(&name) {
                    Some(slot) if slot.generation == generation => slot,
                    _ => {
                        debug!(cluster = %name, generation, "Discarding superseded connection attempt");
                        return;
                    }
                };
                slot.attempts = slot.attempts.saturating_add(1);

                match result {
                    Ok(client) => {
                        slot.client = Some(client);
                        slot.last_error = None;
                        slot.task = None;
                        None
                    }
                    Err(e) => {
                        slot.last_error = Some(e.to_string());
                        Some(e)
                    }
                }
            };

            let Some(e) = failure else {
                if let Some(metrics) = &self.metrics {
                    metrics.set_cluster_ready(&name, true);
                }
                info!(cluster = %name, generation, "Cluster ready");
                return;
            };

            let delay = self.backoff.delay(attempt);
            warn!(
                cluster = %name,
                error = %e,
                retry_in = ?delay,
                "Cluster connection failed"
            );
            attempt = attempt.saturating_add(1);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait() => return,
            }
        }
    }

    /// Apply one Cluster watch event; `seen` tracks names across a relist
    pub fn apply_cluster_event(
        self: &Arc<Self>,
        event: watcher::Event<Cluster>,
        seen: &mut BTreeSet<String>,
    ) {
        match event {
            watcher::Event::Apply(cluster) => self.register(cluster),
            watcher::Event::Delete(cluster) => self.deregister(&cluster.name_any()),
            watcher::Event::Init => seen.clear(),
            watcher::Event::InitApply(cluster) => {
                seen.insert(cluster.name_any());
                self.register(cluster);
            }
            watcher::Event::InitDone => {
                for name in self.cluster_names() {
                    if !seen.contains(&name) {
                        self.deregister(&name);
                    }
                }
                seen.clear();
            }
        }
    }

    /// Watch Clusters and their credential Secrets until shutdown
    pub async fn run(self: Arc<Self>, clusters: Api<Cluster>, secrets: Api<Secret>) {
        let mut shutdown = self.shutdown.clone();
        let mut cluster_events = watcher(clusters, watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut secret_events = watcher(secrets, watcher::Config::default())
            .default_backoff()
            .applied_objects()
            .boxed();
        let mut seen = BTreeSet::new();

        info!("Cluster store watching clusters");
        loop {
            tokio::select! {
                event = cluster_events.next() => match event {
                    Some(Ok(event)) => self.apply_cluster_event(event, &mut seen),
                    Some(Err(e)) => warn!(error = %e, "Cluster watch error"),
                    None => break,
                },
                secret = secret_events.next() => match secret {
                    Some(Ok(secret)) => self.credentials_changed(&secret),
                    Some(Err(e)) => warn!(error = %e, "Cluster secret watch error"),
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }

        self.stop_all();
    }
}

#[cfg(test)]
#[path = "clusterstore_test.rs"]
mod tests;
