//! Custom resources of the `shipper.booking.com/v1alpha1` API group
//!
//! - `Application` - user-declared rollout template, source of Releases
//! - `Release` - one rollout attempt with a frozen strategy snapshot
//! - `CapacityTarget` / `TrafficTarget` / `InstallationTarget` - per-cluster
//!   desired and achieved state, one of each per Release
//! - `Cluster` - a registered application cluster (cluster-scoped)

pub mod application;
pub mod cluster;
pub mod release;
pub mod strategy;
pub mod target;

pub use application::{Application, ApplicationSpec, ApplicationStatus};
pub use cluster::{Cluster, ClusterSpec};
pub use release::{Release, ReleaseSpec, ReleaseStatus};
pub use strategy::{RolloutStrategy, RolloutStrategyStep, RolloutStrategyStepValue, StrategyState};
pub use target::{CapacityTarget, InstallationTarget, TrafficTarget};

/// API group of every shipper resource
pub const GROUP: &str = "shipper.booking.com";

/// Label carrying the owning Application name
pub const APP_LABEL: &str = "shipper-app";

/// Label carrying the Release name
pub const RELEASE_LABEL: &str = "shipper-release";

/// Annotation with the Release ordinal in its Application's history
pub const RELEASE_GENERATION_ANNOTATION: &str = "shipper.booking.com/release.generation";

/// Annotation with the comma-separated clusters a Release was scheduled on
pub const RELEASE_CLUSTERS_ANNOTATION: &str = "shipper.booking.com/release.clusters";

/// Annotation (on a Cluster or its credentials Secret) disabling TLS verification
pub const SKIP_TLS_VERIFY_ANNOTATION: &str =
    "shipper.booking.com/cluster-secret.insecure-tls-skip-verify";

/// Namespace holding per-cluster credential Secrets unless overridden
pub const DEFAULT_SECRETS_NAMESPACE: &str = "shipper-system";

/// Tri-state condition status used by per-cluster and release conditions
#[derive(
    serde::Serialize,
    serde::Deserialize,
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    schemars::JsonSchema,
)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Schema for free-form objects (chart values)
pub(crate) fn preserve_unknown_fields(
    _generator: &mut schemars::SchemaGenerator,
) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

#[cfg(test)]
#[path = "crd_test.rs"]
mod tests;
