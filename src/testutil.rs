//! Shared test fixtures: object builders, a scriptable cluster connector and
//! a condition-polling helper.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::backoff::Backoff;
use crate::clusterstore::{ClusterClient, ClusterConnector, ClusterStore, ConnectError};
use crate::crd::application::{Chart, ReleaseEnvironment};
use crate::crd::release::ReleaseSpec;
use crate::crd::{
    Application, ApplicationSpec, ApplicationStatus, Cluster, ClusterSpec, Release,
    RolloutStrategy, RolloutStrategyStep, RolloutStrategyStepValue, APP_LABEL,
    RELEASE_CLUSTERS_ANNOTATION, RELEASE_GENERATION_ANNOTATION, RELEASE_LABEL,
};
use crate::server::{shutdown_channel, ShutdownController};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "default";

/// Poll `check` until it returns `Ok`, panicking with the last observed
/// state once `timeout` elapses
pub async fn poll_until<T>(
    what: &str,
    timeout: Duration,
    mut check: impl FnMut() -> Result<T, String>,
) -> T {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let last = match check() {
            Ok(value) => return value,
            Err(state) => state,
        };
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out after {timeout:?} waiting for {what}; last state: {last}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connector whose per-cluster outcome is scripted by the test
#[derive(Default)]
pub struct FakeConnector {
    unreachable: Mutex<BTreeSet<String>>,
    attempts: Mutex<BTreeMap<String, usize>>,
    total: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unreachable(&self, cluster: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap();
        if unreachable {
            set.insert(cluster.to_string());
        } else {
            set.remove(cluster);
        }
    }

    pub fn attempts(&self, cluster: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(cluster)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_attempts(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterConnector for FakeConnector {
    async fn connect(&self, cluster: &Cluster) -> Result<ClusterClient, ConnectError> {
        use kube::ResourceExt;
        let name = cluster.name_any();
        *self.attempts.lock().unwrap().entry(name.clone()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        if self.unreachable.lock().unwrap().contains(&name) {
            return Err(ConnectError::Timeout {
                cluster: name,
                timeout: Duration::from_millis(1),
            });
        }
        Ok(ClusterClient::new_mock(&name))
    }
}

/// Cluster store driven by `connector`, with millisecond backoff
pub fn cluster_store(connector: Arc<FakeConnector>) -> (Arc<ClusterStore>, ShutdownController) {
    let (controller, signal) = shutdown_channel();
    let store = ClusterStore::new(
        connector,
        Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        signal,
        None,
    );
    (store, controller)
}

pub fn cluster(name: &str) -> Cluster {
    Cluster::new(
        name,
        ClusterSpec {
            api_master: format!("https://{name}.example.com:6443"),
            region: "eu-west".to_string(),
            ..Default::default()
        },
    )
}

pub fn step(name: &str, capacity: (i32, i32), traffic: (i32, i32)) -> RolloutStrategyStep {
    RolloutStrategyStep {
        name: name.to_string(),
        capacity: RolloutStrategyStepValue {
            incumbent: capacity.0,
            contender: capacity.1,
        },
        traffic: RolloutStrategyStepValue {
            incumbent: traffic.0,
            contender: traffic.1,
        },
    }
}

/// staging (100/1, 100/0) → 50/50 → full on (0/100)
pub fn vanguard() -> RolloutStrategy {
    RolloutStrategy {
        steps: vec![
            step("staging", (100, 1), (100, 0)),
            step("50/50", (50, 50), (50, 50)),
            step("full on", (0, 100), (0, 100)),
        ],
    }
}

/// Single step straight to 100%
pub fn all_in() -> RolloutStrategy {
    RolloutStrategy {
        steps: vec![step("full on", (0, 100), (0, 100))],
    }
}

pub fn environment(strategy: RolloutStrategy, replicas: i32) -> ReleaseEnvironment {
    ReleaseEnvironment {
        chart: Chart {
            name: "nginx".to_string(),
            version: "0.0.1".to_string(),
            repo_url: "https://charts.example.com".to_string(),
        },
        values: BTreeMap::from([("replicaCount".to_string(), serde_json::json!(replicas))]),
        strategy,
        ..Default::default()
    }
}

pub fn application(name: &str, history: &[&str], strategy: RolloutStrategy) -> Application {
    let mut app = Application::new(
        name,
        ApplicationSpec {
            revision_history_limit: None,
            template: environment(strategy, 1),
        },
    );
    app.metadata.namespace = Some(NAMESPACE.to_string());
    app.status = Some(ApplicationStatus {
        history: history.iter().map(|s| s.to_string()).collect(),
    });
    app
}

pub fn release(
    app: &str,
    name: &str,
    generation: i64,
    clusters: &[&str],
    environment: ReleaseEnvironment,
    target_step: i32,
) -> Release {
    let mut rel = Release::new(
        name,
        ReleaseSpec {
            target_step,
            environment,
        },
    );
    rel.metadata.namespace = Some(NAMESPACE.to_string());
    rel.metadata.uid = Some(format!("uid-{name}"));
    rel.metadata.labels = Some(BTreeMap::from([
        (APP_LABEL.to_string(), app.to_string()),
        (RELEASE_LABEL.to_string(), name.to_string()),
    ]));
    rel.metadata.annotations = Some(BTreeMap::from([
        (
            RELEASE_GENERATION_ANNOTATION.to_string(),
            generation.to_string(),
        ),
        (RELEASE_CLUSTERS_ANNOTATION.to_string(), clusters.join(",")),
    ]));
    rel
}
