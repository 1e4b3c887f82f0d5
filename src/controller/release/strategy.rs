//! Per-step state machine
//!
//! Pure functions: desired per-cluster weights for a step, and the next
//! strategy state from the aggregated verdicts. Installation is checked
//! first, then capacity, then traffic; the first unsatisfied dimension is
//! the only `waitingFor*` flag set.

use crate::controller::aggregate::Verdict;
use crate::crd::release::{ReleaseStrategyState, StrategyConditionType};
use crate::crd::target::{
    CapacityTargetSpec, ClusterCapacityTarget, ClusterTrafficTarget, InstallationTargetSpec,
    TrafficTargetSpec,
};
use crate::crd::{RolloutStrategyStep, StrategyState};

/// Which half of a step's (incumbent, contender) pairs applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Incumbent,
    Contender,
    /// Drained to zero regardless of the step
    Retired,
}

/// Capacity percent and traffic weight for `side` at `step`
pub fn step_weights(step: &RolloutStrategyStep, side: Side) -> (i32, u32) {
    let (capacity, traffic) = match side {
        Side::Incumbent => (step.capacity.incumbent, step.traffic.incumbent),
        Side::Contender => (step.capacity.contender, step.traffic.contender),
        Side::Retired => (0, 0),
    };
    (capacity.clamp(0, 100), traffic.clamp(0, 100) as u32)
}

/// Desired target specs of one release on its scheduled clusters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredTargets {
    pub installation: InstallationTargetSpec,
    pub capacity: CapacityTargetSpec,
    pub traffic: TrafficTargetSpec,
}

pub fn desired_targets(
    clusters: &[String],
    step: &RolloutStrategyStep,
    side: Side,
    total_replicas: i32,
) -> DesiredTargets {
    let (percent, weight) = step_weights(step, side);
    let mut clusters = clusters.to_vec();
    clusters.sort();
    clusters.dedup();

    DesiredTargets {
        capacity: CapacityTargetSpec {
            clusters: clusters
                .iter()
                .map(|name| ClusterCapacityTarget {
                    name: name.clone(),
                    percent,
                    total_replica_count: total_replicas,
                })
                .collect(),
        },
        traffic: TrafficTargetSpec {
            clusters: clusters
                .iter()
                .map(|name| ClusterTrafficTarget {
                    name: name.clone(),
                    weight,
                })
                .collect(),
        },
        installation: InstallationTargetSpec { clusters },
    }
}

/// Aggregated verdicts of one pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observations {
    pub contender_installation: Verdict,
    pub contender_capacity: Verdict,
    pub contender_traffic: Verdict,
    /// `None` when there is no incumbent
    pub incumbent_capacity: Option<Verdict>,
    pub incumbent_traffic: Option<Verdict>,
}

impl Observations {
    fn capacity(&self) -> Verdict {
        match &self.incumbent_capacity {
            Some(incumbent) => self.contender_capacity.clone().and(incumbent.clone()),
            None => self.contender_capacity.clone(),
        }
    }

    fn traffic(&self) -> Verdict {
        match &self.incumbent_traffic {
            Some(incumbent) => self.contender_traffic.clone().and(incumbent.clone()),
            None => self.contender_traffic.clone(),
        }
    }

    /// Per-dimension verdicts in the order they are reported as conditions
    pub fn conditions(&self) -> Vec<(StrategyConditionType, &Verdict)> {
        let mut out = vec![
            (
                StrategyConditionType::ContenderAchievedInstallation,
                &self.contender_installation,
            ),
            (
                StrategyConditionType::ContenderAchievedCapacity,
                &self.contender_capacity,
            ),
            (
                StrategyConditionType::ContenderAchievedTraffic,
                &self.contender_traffic,
            ),
        ];
        if let Some(v) = &self.incumbent_capacity {
            out.push((StrategyConditionType::IncumbentAchievedCapacity, v));
        }
        if let Some(v) = &self.incumbent_traffic {
            out.push((StrategyConditionType::IncumbentAchievedTraffic, v));
        }
        out
    }
}

/// Outcome of evaluating a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: ReleaseStrategyState,
    /// The target step is fully achieved
    pub achieved: bool,
    /// Reason of the blocking dimension, if any
    pub reason: Option<String>,
}

fn waiting(
    installation: bool,
    capacity: bool,
    traffic: bool,
    command: bool,
) -> ReleaseStrategyState {
    ReleaseStrategyState {
        waiting_for_installation: StrategyState::from(installation),
        waiting_for_capacity: StrategyState::from(capacity),
        waiting_for_traffic: StrategyState::from(traffic),
        waiting_for_command: StrategyState::from(command),
    }
}

/// Next strategy state of the contender
pub fn evaluate(observations: &Observations) -> Transition {
    let installation = &observations.contender_installation;
    if !installation.satisfied {
        return Transition {
            state: waiting(true, false, false, false),
            achieved: false,
            reason: installation.reason.clone(),
        };
    }

    let capacity = observations.capacity();
    if !capacity.satisfied {
        return Transition {
            state: waiting(false, true, false, false),
            achieved: false,
            reason: capacity.reason,
        };
    }

    let traffic = observations.traffic();
    if !traffic.satisfied {
        return Transition {
            state: waiting(false, false, true, false),
            achieved: false,
            reason: traffic.reason,
        };
    }

    // Parked: the operator decides whether and where to move next
    Transition {
        state: waiting(false, false, false, true),
        achieved: true,
        reason: None,
    }
}

/// State reported by incumbent and retired releases
pub fn settled_state() -> ReleaseStrategyState {
    waiting(false, false, false, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::vanguard;

    fn ok() -> Verdict {
        Verdict::satisfied()
    }

    fn no(reason: &str) -> Verdict {
        Verdict::unsatisfied(reason)
    }

    fn flags(state: &ReleaseStrategyState) -> [StrategyState; 4] {
        [
            state.waiting_for_installation,
            state.waiting_for_capacity,
            state.waiting_for_traffic,
            state.waiting_for_command,
        ]
    }

    fn observations(i: Verdict, c: Verdict, t: Verdict, inc: Option<(Verdict, Verdict)>) -> Observations {
        Observations {
            contender_installation: i,
            contender_capacity: c,
            contender_traffic: t,
            incumbent_capacity: inc.as_ref().map(|(c, _)| c.clone()),
            incumbent_traffic: inc.map(|(_, t)| t),
        }
    }

    #[test]
    fn test_contender_and_incumbent_weights() {
        let strategy = vanguard();

        assert_eq!(step_weights(&strategy.steps[0], Side::Contender), (1, 0));
        assert_eq!(step_weights(&strategy.steps[0], Side::Incumbent), (100, 100));
        assert_eq!(step_weights(&strategy.steps[1], Side::Contender), (50, 50));
        assert_eq!(step_weights(&strategy.steps[2], Side::Incumbent), (0, 0));
        assert_eq!(step_weights(&strategy.steps[1], Side::Retired), (0, 0));
    }

    #[test]
    fn test_desired_targets_sorted_per_cluster() {
        let clusters = vec!["kube-b".to_string(), "kube-a".to_string()];

        let desired = desired_targets(&clusters, &vanguard().steps[1], Side::Contender, 4);

        assert_eq!(desired.installation.clusters, vec!["kube-a", "kube-b"]);
        assert_eq!(desired.capacity.clusters[0].name, "kube-a");
        assert_eq!(desired.capacity.clusters[0].percent, 50);
        assert_eq!(desired.capacity.clusters[0].total_replica_count, 4);
        assert_eq!(desired.traffic.clusters[1].name, "kube-b");
        assert_eq!(desired.traffic.clusters[1].weight, 50);
    }

    #[test]
    fn test_installation_blocks_first() {
        let t = evaluate(&observations(no("kube-a not installed"), no("c"), no("t"), None));

        assert_eq!(
            flags(&t.state),
            [StrategyState::True, StrategyState::False, StrategyState::False, StrategyState::False]
        );
        assert_eq!(t.reason.as_deref(), Some("kube-a not installed"));
        assert!(!t.achieved);
    }

    #[test]
    fn test_incumbent_capacity_blocks_capacity() {
        let t = evaluate(&observations(ok(), ok(), no("t"), Some((no("incumbent short"), ok()))));

        assert_eq!(t.state.waiting_for_capacity, StrategyState::True);
        assert_eq!(t.reason.as_deref(), Some("incumbent short"));
    }

    #[test]
    fn test_traffic_blocks_last() {
        let t = evaluate(&observations(ok(), ok(), ok(), Some((ok(), no("weight")))));

        assert_eq!(t.state.waiting_for_traffic, StrategyState::True);
        assert!(!t.achieved);
    }

    #[test]
    fn test_all_satisfied_waits_for_command() {
        let t = evaluate(&observations(ok(), ok(), ok(), None));

        assert!(t.achieved);
        assert_eq!(
            flags(&t.state),
            [StrategyState::False, StrategyState::False, StrategyState::False, StrategyState::True]
        );
    }

    #[test]
    fn test_exactly_one_flag_for_every_combination() {
        let choices = [ok(), no("x")];
        for i in &choices {
            for c in &choices {
                for t in &choices {
                    for inc in [None, Some((ok(), ok())), Some((no("y"), ok())), Some((ok(), no("z")))] {
                        let tr = evaluate(&observations(i.clone(), c.clone(), t.clone(), inc));
                        let set = flags(&tr.state)
                            .iter()
                            .filter(|f| **f == StrategyState::True)
                            .count();
                        assert_eq!(set, 1, "state {}", tr.state);
                    }
                }
            }
        }
    }

    #[test]
    fn test_settled_state_has_no_flag() {
        assert!(flags(&settled_state())
            .iter()
            .all(|f| *f == StrategyState::False));
    }

    #[test]
    fn test_condition_list_includes_incumbent_only_when_present() {
        assert_eq!(observations(ok(), ok(), ok(), None).conditions().len(), 3);
        assert_eq!(
            observations(ok(), ok(), ok(), Some((ok(), ok()))).conditions().len(),
            5
        );
    }
}
