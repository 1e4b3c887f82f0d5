use super::application::ReleaseEnvironment;
use super::strategy::StrategyState;
use super::{ConditionStatus, RELEASE_CLUSTERS_ANNOTATION, RELEASE_GENERATION_ANNOTATION};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Release is one immutable rollout attempt of an Application
///
/// The strategy lives in `spec.environment.strategy` and is frozen at
/// creation time. Operators move `spec.targetStep` forward or backward; the
/// coordinator reports progress in `status`.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "shipper.booking.com",
    version = "v1alpha1",
    kind = "Release",
    namespaced,
    status = "ReleaseStatus",
    shortname = "rel",
    printcolumn = r#"{"name":"Target", "type":"integer", "jsonPath":".spec.targetStep"}"#,
    printcolumn = r#"{"name":"Achieved", "type":"integer", "jsonPath":".status.achievedStep.step"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct ReleaseSpec {
    /// Strategy step the operator wants to reach
    #[serde(rename = "targetStep", default)]
    pub target_step: i32,

    /// Snapshot of the Application template this release was created from
    pub environment: ReleaseEnvironment,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ReleaseStatus {
    /// Last step fully satisfied on every cluster
    #[serde(rename = "achievedStep", skip_serializing_if = "Option::is_none")]
    pub achieved_step: Option<AchievedStep>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ReleaseStrategyStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ReleaseCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct AchievedStep {
    pub step: i32,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ReleaseStrategyStatus {
    pub state: ReleaseStrategyState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ReleaseStrategyCondition>,
}

/// Mutually exclusive blocking reasons; all `False` means nothing is pending
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ReleaseStrategyState {
    #[serde(rename = "waitingForInstallation", default)]
    pub waiting_for_installation: StrategyState,

    #[serde(rename = "waitingForCapacity", default)]
    pub waiting_for_capacity: StrategyState,

    #[serde(rename = "waitingForTraffic", default)]
    pub waiting_for_traffic: StrategyState,

    #[serde(rename = "waitingForCommand", default)]
    pub waiting_for_command: StrategyState,
}

impl std::fmt::Display for ReleaseStrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{installation: {}, capacity: {}, traffic: {}, command: {}}}",
            self.waiting_for_installation,
            self.waiting_for_capacity,
            self.waiting_for_traffic,
            self.waiting_for_command
        )
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum StrategyConditionType {
    ContenderAchievedInstallation,
    ContenderAchievedCapacity,
    ContenderAchievedTraffic,
    IncumbentAchievedCapacity,
    IncumbentAchievedTraffic,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ReleaseStrategyCondition {
    #[serde(rename = "type")]
    pub type_: StrategyConditionType,

    pub status: ConditionStatus,

    /// Step the condition was evaluated against
    pub step: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC3339 timestamp of the last status change
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ReleaseConditionType {
    /// A misconfiguration stops the rollout until the operator fixes it
    Blocked,
    /// The last strategy step has been achieved
    Complete,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ReleaseCondition {
    #[serde(rename = "type")]
    pub type_: ReleaseConditionType,

    pub status: ConditionStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Release {
    /// Clusters this release was scheduled on, sorted and deduplicated
    pub fn scheduled_clusters(&self) -> Vec<String> {
        let mut clusters: Vec<String> = self
            .annotations()
            .get(RELEASE_CLUSTERS_ANNOTATION)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        clusters.sort();
        clusters.dedup();
        clusters
    }

    /// Ordinal position in the Application history, if annotated
    pub fn generation_ordinal(&self) -> Option<i64> {
        self.annotations()
            .get(RELEASE_GENERATION_ANNOTATION)
            .and_then(|v| v.parse().ok())
    }

    /// Achieved step index, if any step has been achieved
    pub fn achieved_step(&self) -> Option<i32> {
        self.status
            .as_ref()
            .and_then(|s| s.achieved_step.as_ref())
            .map(|a| a.step)
    }

    /// True once the final strategy step is both targeted and achieved
    pub fn is_complete(&self) -> bool {
        let last = match self.spec.environment.strategy.last_step_index() {
            Some(last) => last as i32,
            None => return false,
        };
        self.spec.target_step == last && self.achieved_step() == Some(last)
    }

    /// True once the final strategy step has been achieved at least once
    pub fn has_achieved_last_step(&self) -> bool {
        match self.spec.environment.strategy.last_step_index() {
            Some(last) => self.achieved_step() == Some(last as i32),
            None => false,
        }
    }
}
