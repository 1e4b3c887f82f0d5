#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity
#![allow(clippy::expect_used)] // Tests can use expect for better error messages

use super::*;
use crate::testutil::{cluster, cluster_store, poll_until, FakeConnector};
use std::time::Duration;

const AGENT: &str = "test-agent";
const WAIT: Duration = Duration::from_secs(5);

async fn wait_ready(store: &ClusterStore, name: &str) {
    poll_until(&format!("cluster {name} ready"), WAIT, || {
        store
            .get_client(name, AGENT)
            .map(|_| ())
            .map_err(|e| e.to_string())
    })
    .await;
}

#[tokio::test]
async fn test_unknown_cluster_is_reported_with_agent() {
    let (store, _shutdown) = cluster_store(FakeConnector::new());

    let err = store.get_client("nowhere", AGENT).unwrap_err();

    assert_eq!(
        err,
        ClusterStoreError::ClusterUnknown {
            cluster: "nowhere".to_string(),
            agent: AGENT.to_string(),
        }
    );
    assert!(err.to_string().contains(AGENT));
}

#[tokio::test]
async fn test_registered_cluster_becomes_ready() {
    let connector = FakeConnector::new();
    let (store, _shutdown) = cluster_store(connector.clone());

    store.register(cluster("kube-a"));
    wait_ready(&store, "kube-a").await;

    let client = store.get_client("kube-a", AGENT).unwrap();
    assert_eq!(client.name(), "kube-a");
    assert!(store.is_ready("kube-a"));
    assert!(store.is_synced());
    assert_eq!(store.cluster_names(), vec!["kube-a"]);
}

#[tokio::test]
async fn test_unreachable_cluster_does_not_affect_others() {
    let connector = FakeConnector::new();
    connector.set_unreachable("kube-b", true);
    let (store, _shutdown) = cluster_store(connector.clone());

    store.register(cluster("kube-b"));
    store.register(cluster("kube-a"));
    wait_ready(&store, "kube-a").await;

    // kube-b keeps retrying with backoff while kube-a serves
    poll_until("kube-b retried", WAIT, || {
        let attempts = connector.attempts("kube-b");
        if attempts >= 2 {
            Ok(())
        } else {
            Err(format!("{attempts} attempts"))
        }
    })
    .await;

    assert!(store.get_client("kube-a", AGENT).is_ok());
    match store.get_client("kube-b", AGENT) {
        Err(ClusterStoreError::ClusterNotReady { last_error, .. }) => {
            assert!(last_error.unwrap_or_default().contains("kube-b"));
        }
        other => panic!("expected ClusterNotReady, got {other:?}"),
    }
    assert!(
        store.is_synced(),
        "every cluster attempted once, even if it failed"
    );
}

#[tokio::test]
async fn test_unreachable_cluster_recovers() {
    let connector = FakeConnector::new();
    connector.set_unreachable("kube-b", true);
    let (store, _shutdown) = cluster_store(connector.clone());

    store.register(cluster("kube-b"));
    poll_until("first attempt", WAIT, || {
        if connector.attempts("kube-b") > 0 {
            Ok(())
        } else {
            Err("no attempt yet".to_string())
        }
    })
    .await;

    connector.set_unreachable("kube-b", false);
    wait_ready(&store, "kube-b").await;
}

#[tokio::test]
async fn test_unchanged_cluster_is_not_reconnected() {
    let connector = FakeConnector::new();
    let (store, _shutdown) = cluster_store(connector.clone());

    store.register(cluster("kube-a"));
    wait_ready(&store, "kube-a").await;
    store.register(cluster("kube-a"));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(connector.attempts("kube-a"), 1);
}

#[tokio::test]
async fn test_failed_reconnect_keeps_serving_previous_client() {
    let connector = FakeConnector::new();
    let (store, _shutdown) = cluster_store(connector.clone());

    store.register(cluster("kube-a"));
    wait_ready(&store, "kube-a").await;

    // Spec change with broken connectivity: a new generation starts and fails
    connector.set_unreachable("kube-a", true);
    let mut moved = cluster("kube-a");
    moved.spec.api_master = "https://kube-a-new.example.com:6443".to_string();
    store.register(moved);

    poll_until("reconnect attempted", WAIT, || {
        let attempts = connector.attempts("kube-a");
        if attempts >= 3 {
            Ok(())
        } else {
            Err(format!("{attempts} attempts"))
        }
    })
    .await;

    assert!(
        store.get_client("kube-a", AGENT).is_ok(),
        "previous client is served until the new one is ready"
    );
}

#[tokio::test]
async fn test_deregister_removes_only_that_cluster() {
    let (store, _shutdown) = cluster_store(FakeConnector::new());
    store.register(cluster("kube-a"));
    store.register(cluster("kube-b"));
    wait_ready(&store, "kube-a").await;
    wait_ready(&store, "kube-b").await;

    store.deregister("kube-b");

    assert!(store.get_client("kube-a", AGENT).is_ok());
    assert!(matches!(
        store.get_client("kube-b", AGENT),
        Err(ClusterStoreError::ClusterUnknown { .. })
    ));
}

#[tokio::test]
async fn test_relist_prunes_vanished_clusters() {
    let (store, _shutdown) = cluster_store(FakeConnector::new());
    let mut seen = BTreeSet::new();

    store.apply_cluster_event(watcher::Event::Init, &mut seen);
    store.apply_cluster_event(watcher::Event::InitApply(cluster("kube-a")), &mut seen);
    store.apply_cluster_event(watcher::Event::InitApply(cluster("kube-b")), &mut seen);
    store.apply_cluster_event(watcher::Event::InitDone, &mut seen);
    assert_eq!(store.cluster_names(), vec!["kube-a", "kube-b"]);

    // kube-b was deleted while the watch was down
    store.apply_cluster_event(watcher::Event::Init, &mut seen);
    store.apply_cluster_event(watcher::Event::InitApply(cluster("kube-a")), &mut seen);
    store.apply_cluster_event(watcher::Event::InitDone, &mut seen);

    assert_eq!(store.cluster_names(), vec!["kube-a"]);
}

#[tokio::test]
async fn test_delete_event_deregisters() {
    let (store, _shutdown) = cluster_store(FakeConnector::new());
    let mut seen = BTreeSet::new();

    store.apply_cluster_event(watcher::Event::Apply(cluster("kube-a")), &mut seen);
    store.apply_cluster_event(watcher::Event::Delete(cluster("kube-a")), &mut seen);

    assert!(store.cluster_names().is_empty());
}

#[tokio::test]
async fn test_secret_rotation_reconnects() {
    let connector = FakeConnector::new();
    let (store, _shutdown) = cluster_store(connector.clone());
    store.register(cluster("kube-a"));
    wait_ready(&store, "kube-a").await;

    let mut secret = Secret::default();
    secret.metadata.name = Some("kube-a".to_string());
    secret.metadata.resource_version = Some("1".to_string());
    store.credentials_changed(&secret);
    store.credentials_changed(&secret);
    assert_eq!(connector.attempts("kube-a"), 1, "first sighting only records");

    secret.metadata.resource_version = Some("2".to_string());
    store.credentials_changed(&secret);

    poll_until("reconnect after rotation", WAIT, || {
        let attempts = connector.attempts("kube-a");
        if attempts == 2 {
            Ok(())
        } else {
            Err(format!("{attempts} attempts"))
        }
    })
    .await;
    wait_ready(&store, "kube-a").await;
}

fn credentials(name: &str, version: &str) -> Secret {
    let mut secret = Secret::default();
    secret.metadata.name = Some(name.to_string());
    secret.metadata.resource_version = Some(version.to_string());
    secret
}

async fn wait_attempts(connector: &FakeConnector, name: &str, want: usize) {
    poll_until(&format!("{want} attempts on {name}"), WAIT, || {
        let attempts = connector.attempts(name);
        if attempts == want {
            Ok(())
        } else {
            Err(format!("{attempts} attempts"))
        }
    })
    .await;
}

#[tokio::test]
async fn test_rotation_reconnects_when_secret_precedes_cluster() {
    let connector = FakeConnector::new();
    let (store, _shutdown) = cluster_store(connector.clone());

    // Operators create the Secret first, then the Cluster
    store.credentials_changed(&credentials("kube-n", "1"));
    store.register(cluster("kube-n"));
    wait_ready(&store, "kube-n").await;
    assert_eq!(connector.attempts("kube-n"), 1);

    store.credentials_changed(&credentials("kube-n", "2"));

    wait_attempts(&connector, "kube-n", 2).await;
    wait_ready(&store, "kube-n").await;
}

#[tokio::test]
async fn test_rotation_reconnects_after_reregistration() {
    let connector = FakeConnector::new();
    let (store, _shutdown) = cluster_store(connector.clone());
    store.register(cluster("kube-a"));
    wait_ready(&store, "kube-a").await;
    store.credentials_changed(&credentials("kube-a", "1"));

    store.deregister("kube-a");
    store.register(cluster("kube-a"));
    wait_attempts(&connector, "kube-a", 2).await;
    wait_ready(&store, "kube-a").await;

    store.credentials_changed(&credentials("kube-a", "2"));

    wait_attempts(&connector, "kube-a", 3).await;
}

#[tokio::test]
async fn test_rotation_of_unregistered_cluster_is_recorded_only() {
    let connector = FakeConnector::new();
    let (store, _shutdown) = cluster_store(connector.clone());

    store.credentials_changed(&credentials("kube-z", "1"));
    store.credentials_changed(&credentials("kube-z", "2"));

    assert!(store.cluster_names().is_empty());
    assert_eq!(connector.total_attempts(), 0);
}

#[tokio::test]
async fn test_stop_all_drops_every_cluster() {
    let connector = FakeConnector::new();
    connector.set_unreachable("kube-b", true);
    let (store, _shutdown) = cluster_store(connector.clone());
    store.register(cluster("kube-a"));
    store.register(cluster("kube-b"));

    store.stop_all();

    assert!(store.cluster_names().is_empty());
    assert!(store.is_synced(), "an empty store is trivially synced");
}

#[tokio::test]
async fn test_shutdown_stops_retry_loops() {
    let connector = FakeConnector::new();
    connector.set_unreachable("kube-b", true);
    let (store, shutdown) = cluster_store(connector.clone());
    store.register(cluster("kube-b"));
    poll_until("first attempt", WAIT, || {
        if connector.attempts("kube-b") > 0 {
            Ok(())
        } else {
            Err("no attempt yet".to_string())
        }
    })
    .await;

    shutdown.shutdown(crate::server::ShutdownReason::Signal("SIGTERM"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = connector.total_attempts();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(connector.total_attempts(), settled);
}
