//! Per-release, per-cluster target objects
//!
//! The coordinator writes `spec`; the per-cluster executors report `status`.

use super::ConditionStatus;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "shipper.booking.com",
    version = "v1alpha1",
    kind = "CapacityTarget",
    namespaced,
    status = "CapacityTargetStatus",
    shortname = "ct"
)]
pub struct CapacityTargetSpec {
    #[serde(default)]
    pub clusters: Vec<ClusterCapacityTarget>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterCapacityTarget {
    pub name: String,

    /// Share of `totalReplicaCount` to run, in [0, 100]
    pub percent: i32,

    #[serde(rename = "totalReplicaCount")]
    pub total_replica_count: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct CapacityTargetStatus {
    #[serde(default)]
    pub clusters: Vec<ClusterCapacityStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterCapacityStatus {
    pub name: String,

    #[serde(rename = "availableReplicas", default)]
    pub available_replicas: i32,

    #[serde(rename = "achievedPercent", default)]
    pub achieved_percent: i32,

    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "shipper.booking.com",
    version = "v1alpha1",
    kind = "TrafficTarget",
    namespaced,
    status = "TrafficTargetStatus",
    shortname = "tt"
)]
pub struct TrafficTargetSpec {
    #[serde(default)]
    pub clusters: Vec<ClusterTrafficTarget>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterTrafficTarget {
    pub name: String,

    /// Proportional traffic weight for this release in the cluster
    pub weight: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct TrafficTargetStatus {
    #[serde(default)]
    pub clusters: Vec<ClusterTrafficStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterTrafficStatus {
    pub name: String,

    #[serde(rename = "achievedTraffic", default)]
    pub achieved_traffic: u32,

    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "shipper.booking.com",
    version = "v1alpha1",
    kind = "InstallationTarget",
    namespaced,
    status = "InstallationTargetStatus",
    shortname = "it"
)]
pub struct InstallationTargetSpec {
    /// Clusters the release must be installed on
    #[serde(default)]
    pub clusters: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct InstallationTargetStatus {
    #[serde(default)]
    pub clusters: Vec<ClusterInstallationStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterInstallationStatus {
    pub name: String,

    #[serde(default)]
    pub installed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub conditions: Vec<ClusterCondition>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ClusterConditionType {
    /// The executor can talk to the cluster
    Operational,
    /// The executor's view of the cluster matches the spec
    Ready,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: ClusterConditionType,

    pub status: ConditionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ClusterCondition {
    pub fn new(type_: ClusterConditionType, status: ConditionStatus) -> Self {
        Self {
            type_,
            status,
            reason: None,
            message: None,
        }
    }
}

/// Find the status of a condition type, `Unknown` when absent
pub fn condition_status(
    conditions: &[ClusterCondition],
    type_: ClusterConditionType,
) -> ConditionStatus {
    conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status)
        .unwrap_or_default()
}
