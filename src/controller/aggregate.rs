//! Target aggregators
//!
//! Each aggregator reduces the per-cluster status of one target kind into a
//! single verdict for the whole release. Clusters are visited in ascending
//! name order and the first offender is reported, so status strings are
//! reproducible. A cluster that has not reported yet is simply not
//! satisfied.

use super::replicas::calculate_desired_replica_count;
use crate::crd::target::{
    condition_status, CapacityTargetSpec, CapacityTargetStatus, ClusterCondition,
    ClusterConditionType, InstallationTargetStatus, TrafficTargetSpec, TrafficTargetStatus,
};
use crate::crd::ConditionStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub satisfied: bool,
    /// Why the dimension is not satisfied; `None` when it is
    pub reason: Option<String>,
}

impl Verdict {
    pub fn satisfied() -> Self {
        Self {
            satisfied: true,
            reason: None,
        }
    }

    pub fn unsatisfied(reason: impl Into<String>) -> Self {
        Self {
            satisfied: false,
            reason: Some(reason.into()),
        }
    }

    /// First unsatisfied of `self` and `other`
    pub fn and(self, other: Verdict) -> Verdict {
        if self.satisfied {
            other
        } else {
            self
        }
    }
}

/// Every desired cluster must report `installed = true`
pub fn installation(desired: &[String], status: Option<&InstallationTargetStatus>) -> Verdict {
    let mut clusters: Vec<&String> = desired.iter().collect();
    clusters.sort();

    for cluster in clusters {
        let installed = status
            .and_then(|s| s.clusters.iter().find(|c| &c.name == cluster))
            .is_some_and(|c| c.installed);
        if !installed {
            return Verdict::unsatisfied(format!("{cluster} not installed"));
        }
    }
    Verdict::satisfied()
}

/// Every cluster must have at least the desired replicas available and be
/// Operational and Ready; over-provisioning is fine
pub fn capacity(desired: &CapacityTargetSpec, status: Option<&CapacityTargetStatus>) -> Verdict {
    let mut clusters: Vec<_> = desired.clusters.iter().collect();
    clusters.sort_by(|a, b| a.name.cmp(&b.name));

    for spec in clusters {
        let Some(reported) = status.and_then(|s| s.clusters.iter().find(|c| c.name == spec.name))
        else {
            return Verdict::unsatisfied(format!(
                "{} has not reported capacity yet",
                spec.name
            ));
        };

        if let Some(reason) = unhealthy(&spec.name, &reported.conditions) {
            return Verdict::unsatisfied(reason);
        }

        let want = calculate_desired_replica_count(spec.total_replica_count, spec.percent);
        if reported.available_replicas < want {
            return Verdict::unsatisfied(format!(
                "{}: {} of {} replicas available ({} short)",
                spec.name,
                reported.available_replicas,
                want,
                want - reported.available_replicas
            ));
        }
    }
    Verdict::satisfied()
}

/// Every cluster must report exactly the desired weight and be Operational
/// and Ready
pub fn traffic(desired: &TrafficTargetSpec, status: Option<&TrafficTargetStatus>) -> Verdict {
    let mut clusters: Vec<_> = desired.clusters.iter().collect();
    clusters.sort_by(|a, b| a.name.cmp(&b.name));

    for spec in clusters {
        let Some(reported) = status.and_then(|s| s.clusters.iter().find(|c| c.name == spec.name))
        else {
            return Verdict::unsatisfied(format!("{} has not reported traffic yet", spec.name));
        };

        if let Some(reason) = unhealthy(&spec.name, &reported.conditions) {
            return Verdict::unsatisfied(reason);
        }

        if reported.achieved_traffic != spec.weight {
            return Verdict::unsatisfied(format!(
                "{}: traffic weight is {}, want {}",
                spec.name, reported.achieved_traffic, spec.weight
            ));
        }
    }
    Verdict::satisfied()
}

/// Reason the cluster is not Operational or not Ready, if any
fn unhealthy(cluster: &str, conditions: &[ClusterCondition]) -> Option<String> {
    for type_ in [ClusterConditionType::Operational, ClusterConditionType::Ready] {
        let status = condition_status(conditions, type_);
        if status != ConditionStatus::True {
            let detail = conditions
                .iter()
                .find(|c| c.type_ == type_)
                .and_then(|c| c.reason.clone().or_else(|| c.message.clone()));
            return Some(match detail {
                Some(detail) => format!("{cluster}: {type_:?} is {status:?} ({detail})"),
                None => format!("{cluster}: {type_:?} is {status:?}"),
            });
        }
    }
    None
}

#[cfg(test)]
#[path = "aggregate_test.rs"]
mod tests;
