use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster is a registered application cluster
///
/// Cluster-scoped. Credentials live in a Secret of the same name in the
/// controller's secrets namespace.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "shipper.booking.com",
    version = "v1alpha1",
    kind = "Cluster",
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Region", "type":"string", "jsonPath":".spec.region"}"#,
    printcolumn = r#"{"name":"API", "type":"string", "jsonPath":".spec.apiMaster"}"#
)]
pub struct ClusterSpec {
    /// URL of the cluster's API server
    #[serde(rename = "apiMaster")]
    pub api_master: String,

    pub region: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub scheduler: ClusterSchedulerSettings,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterSchedulerSettings {
    /// Unschedulable clusters keep serving existing releases only
    #[serde(default)]
    pub unschedulable: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ClusterStatus {
    #[serde(rename = "inService", default)]
    pub in_service: bool,
}
