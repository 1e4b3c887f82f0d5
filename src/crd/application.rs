use super::strategy::RolloutStrategy;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application is the user-facing rollout template
///
/// Every change to `spec.template` produces a new Release; the Release names
/// are recorded oldest-first in `status.history`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "shipper.booking.com",
    version = "v1alpha1",
    kind = "Application",
    namespaced,
    status = "ApplicationStatus",
    shortname = "app",
    printcolumn = r#"{"name":"Chart", "type":"string", "jsonPath":".spec.template.chart.version"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ApplicationSpec {
    /// Number of old Releases to keep around
    #[serde(rename = "revisionHistoryLimit", skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    /// Template every new Release is stamped from
    pub template: ReleaseEnvironment,
}

/// Everything needed to roll out one version of an application
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ReleaseEnvironment {
    pub chart: Chart,

    /// Chart values; `replicaCount` is the total replica intent per cluster
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[schemars(schema_with = "super::preserve_unknown_fields")]
    pub values: BTreeMap<String, serde_json::Value>,

    #[serde(rename = "clusterRequirements", default)]
    pub cluster_requirements: ClusterRequirements,

    #[serde(default)]
    pub strategy: RolloutStrategy,
}

/// Replica count used when the chart values do not set `replicaCount`
pub const DEFAULT_REPLICA_COUNT: i32 = 1;

impl ReleaseEnvironment {
    /// Total replica intent read from `values.replicaCount`
    pub fn replica_count(&self) -> i32 {
        self.values
            .get("replicaCount")
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok())
            .filter(|v| *v >= 0)
            .unwrap_or(DEFAULT_REPLICA_COUNT)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct Chart {
    pub name: String,
    pub version: String,
    #[serde(rename = "repoUrl")]
    pub repo_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterRequirements {
    #[serde(default)]
    pub regions: Vec<RegionRequirement>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RegionRequirement {
    pub name: String,

    /// Number of clusters to schedule in this region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ApplicationStatus {
    /// Release names, oldest first; the last entry is the contender
    #[serde(default)]
    pub history: Vec<String>,
}

impl Application {
    /// Release history, empty when no status has been written yet
    pub fn history(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.history.as_slice())
            .unwrap_or(&[])
    }
}
