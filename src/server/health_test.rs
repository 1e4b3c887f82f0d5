//! Tests for health and metrics endpoints

use super::*;
use crate::server::create_metrics;
use std::time::Duration;

/// Wait for the server to accept connections, retrying with backoff
async fn wait_for_server(port: u16, max_retries: u32) -> reqwest::Client {
    let client = reqwest::Client::new();
    let mut delay = Duration::from_millis(10);

    for attempt in 1..=max_retries {
        match client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .timeout(Duration::from_millis(100))
            .send()
            .await
        {
            Ok(_) => return client,
            Err(_) if attempt < max_retries => {
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_millis(200));
            }
            Err(e) => panic!("Server not ready after {} attempts: {}", max_retries, e),
        }
    }
    client
}

fn spawn_server(
    port: u16,
    readiness: ReadinessState,
    metrics: SharedMetrics,
) -> tokio::task::JoinHandle<Result<(), std::io::Error>> {
    tokio::spawn(async move { run_health_server(port, readiness, metrics).await })
}

#[tokio::test]
async fn test_healthz_returns_200() {
    let port = 18180;
    let handle = spawn_server(port, ReadinessState::new(), create_metrics().unwrap());
    let client = wait_for_server(port, 10).await;

    let response = client
        .get(format!("http://127.0.0.1:{}/healthz", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to connect to health server");

    assert_eq!(response.status(), 200, "Liveness probe should return 200");
    handle.abort();
}

#[tokio::test]
async fn test_readyz_follows_readiness_state() {
    let readiness = ReadinessState::new();
    let port = 18181;
    let handle = spawn_server(port, readiness.clone(), create_metrics().unwrap());
    let client = wait_for_server(port, 10).await;
    let url = format!("http://127.0.0.1:{}/readyz", port);

    let before = client.get(&url).send().await.expect("readyz request");
    assert_eq!(before.status(), 503, "not ready until clusters have synced");

    readiness.set_ready();
    let ready = client.get(&url).send().await.expect("readyz request");
    assert_eq!(ready.status(), 200);

    readiness.set_not_ready();
    let draining = client.get(&url).send().await.expect("readyz request");
    assert_eq!(draining.status(), 503, "not ready again during shutdown");

    handle.abort();
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_controller_metrics() {
    let metrics = create_metrics().unwrap();
    metrics.record_reconciliation_success(0.01);
    metrics.set_cluster_ready("kube-a", true);
    let port = 18182;
    let handle = spawn_server(port, ReadinessState::new(), metrics);
    let client = wait_for_server(port, 10).await;

    let response = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .await
        .expect("metrics request");

    assert_eq!(response.status(), 200);
    let body = response.text().await.expect("metrics body");
    assert!(body.contains("shipper_reconciliations_total"), "{body}");
    assert!(body.contains(r#"shipper_cluster_ready{cluster="kube-a"} 1"#), "{body}");

    handle.abort();
}

#[test]
fn test_readiness_state_transitions() {
    let state = ReadinessState::new();
    assert!(!state.is_ready());

    state.set_ready();
    assert!(state.is_ready());

    // Clones share state
    let cloned = state.clone();
    cloned.set_not_ready();
    assert!(!state.is_ready());
}
