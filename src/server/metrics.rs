//! Prometheus metrics for the release coordinator and the cluster store

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: Histogram,
    achieved_step: IntGaugeVec,
    cluster_ready: IntGaugeVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "shipper_reconciliations_total",
                "Release reconciliation passes by result",
            ),
            &["result"],
        )?;
        let reconcile_duration = Histogram::with_opts(HistogramOpts::new(
            "shipper_reconcile_duration_seconds",
            "Duration of a release reconciliation pass",
        ))?;
        let achieved_step = IntGaugeVec::new(
            Opts::new(
                "shipper_release_achieved_step",
                "Last strategy step achieved by a release (-1 when none)",
            ),
            &["namespace", "release"],
        )?;
        let cluster_ready = IntGaugeVec::new(
            Opts::new(
                "shipper_cluster_ready",
                "1 when the cluster store holds a ready client for the cluster",
            ),
            &["cluster"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(achieved_step.clone()))?;
        registry.register(Box::new(cluster_ready.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            achieved_step,
            cluster_ready,
        })
    }

    pub fn record_reconciliation_success(&self, duration_secs: f64) {
        self.reconciliations.with_label_values(&["success"]).inc();
        self.reconcile_duration.observe(duration_secs);
    }

    pub fn record_reconciliation_error(&self, duration_secs: f64) {
        self.reconciliations.with_label_values(&["error"]).inc();
        self.reconcile_duration.observe(duration_secs);
    }

    pub fn set_achieved_step(&self, namespace: &str, release: &str, step: Option<i32>) {
        self.achieved_step
            .with_label_values(&[namespace, release])
            .set(step.map_or(-1, i64::from));
    }

    pub fn set_cluster_ready(&self, cluster: &str, ready: bool) {
        self.cluster_ready
            .with_label_values(&[cluster])
            .set(i64::from(ready));
    }

    /// Drop the series of a cluster that is no longer registered
    pub fn remove_cluster(&self, cluster: &str) {
        let _ = self.cluster_ready.remove_label_values(&[cluster]);
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_series() {
        let metrics = create_metrics().unwrap_or_else(|e| panic!("registry: {e}"));

        metrics.record_reconciliation_success(0.25);
        metrics.record_reconciliation_error(0.5);
        metrics.set_achieved_step("default", "app-1", Some(2));
        metrics.set_cluster_ready("kube-a", true);

        let text = metrics.encode().unwrap_or_default();
        assert!(text.contains(r#"shipper_reconciliations_total{result="success"} 1"#));
        assert!(text.contains(r#"shipper_reconciliations_total{result="error"} 1"#));
        assert!(text.contains(r#"shipper_release_achieved_step{namespace="default",release="app-1"} 2"#));
        assert!(text.contains(r#"shipper_cluster_ready{cluster="kube-a"} 1"#));
        assert!(text.contains("shipper_reconcile_duration_seconds_count 2"));
    }

    #[test]
    fn test_removed_cluster_disappears() {
        let metrics = create_metrics().unwrap_or_else(|e| panic!("registry: {e}"));

        metrics.set_cluster_ready("kube-a", false);
        metrics.remove_cluster("kube-a");

        assert!(!metrics.encode().unwrap_or_default().contains("kube-a"));
    }
}
