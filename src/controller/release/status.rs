use crate::crd::release::{
    AchievedStep, ReleaseCondition, ReleaseConditionType, ReleaseStatus, ReleaseStrategyCondition,
    ReleaseStrategyStatus, StrategyConditionType,
};
use crate::crd::{ConditionStatus, Release};
use crate::controller::clock::condition_timestamp;
use chrono::{DateTime, Utc};

use super::strategy::{Observations, Transition};

/// Upsert a strategy condition; `lastTransitionTime` only moves when the
/// status does
pub fn set_strategy_condition(
    conditions: &mut Vec<ReleaseStrategyCondition>,
    type_: StrategyConditionType,
    status: ConditionStatus,
    step: i32,
    reason: Option<String>,
    now: DateTime<Utc>,
) {
    let (reason, message) = match reason {
        Some(message) => (Some(condition_reason(type_).to_string()), Some(message)),
        None => (None, None),
    };

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = Some(condition_timestamp(now));
            }
            existing.status = status;
            existing.step = step;
            existing.reason = reason;
            existing.message = message;
        }
        None => conditions.push(ReleaseStrategyCondition {
            type_,
            status,
            step,
            reason,
            message,
            last_transition_time: Some(condition_timestamp(now)),
        }),
    }
}

/// CamelCase reason for an unsatisfied strategy condition
fn condition_reason(type_: StrategyConditionType) -> &'static str {
    match type_ {
        StrategyConditionType::ContenderAchievedInstallation => "ClustersNotInstalled",
        StrategyConditionType::ContenderAchievedCapacity
        | StrategyConditionType::IncumbentAchievedCapacity => "ClustersNotReady",
        StrategyConditionType::ContenderAchievedTraffic
        | StrategyConditionType::IncumbentAchievedTraffic => "TrafficNotShifted",
    }
}

/// Upsert a release condition; `lastTransitionTime` only moves when the
/// status does
pub fn set_release_condition(
    conditions: &mut Vec<ReleaseCondition>,
    type_: ReleaseConditionType,
    status: ConditionStatus,
    reason: Option<&str>,
    message: Option<String>,
    now: DateTime<Utc>,
) {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status != status {
                existing.last_transition_time = Some(condition_timestamp(now));
            }
            existing.status = status;
            existing.reason = reason.map(String::from);
            existing.message = message;
        }
        None => conditions.push(ReleaseCondition {
            type_,
            status,
            reason: reason.map(String::from),
            message,
            last_transition_time: Some(condition_timestamp(now)),
        }),
    }
}

/// Status of a contender after evaluating `step`
pub fn contender_status(
    release: &Release,
    step: usize,
    observations: &Observations,
    transition: &Transition,
    now: DateTime<Utc>,
) -> ReleaseStatus {
    let mut status = release.status.clone().unwrap_or_default();
    let strategy = &release.spec.environment.strategy;
    let step_index = step as i32;

    if transition.achieved {
        status.achieved_step = Some(AchievedStep {
            step: step_index,
            name: strategy.steps[step].name.clone(),
        });
    }

    let mut strategy_status = status.strategy.take().unwrap_or_default();
    strategy_status.state = transition.state;
    for (type_, verdict) in observations.conditions() {
        set_strategy_condition(
            &mut strategy_status.conditions,
            type_,
            ConditionStatus::from(verdict.satisfied),
            step_index,
            verdict.reason.clone(),
            now,
        );
    }
    if observations.incumbent_capacity.is_none() {
        clear_incumbent_condition(
            &mut strategy_status.conditions,
            StrategyConditionType::IncumbentAchievedCapacity,
            step_index,
            now,
        );
    }
    if observations.incumbent_traffic.is_none() {
        clear_incumbent_condition(
            &mut strategy_status.conditions,
            StrategyConditionType::IncumbentAchievedTraffic,
            step_index,
            now,
        );
    }
    status.strategy = Some(strategy_status);

    unblock(&mut status.conditions, now);
    let complete = transition.achieved
        && strategy.last_step_index() == Some(step)
        && release.spec.target_step == step_index;
    set_release_condition(
        &mut status.conditions,
        ReleaseConditionType::Complete,
        ConditionStatus::from(complete),
        None,
        None,
        now,
    );

    status
}

/// An incumbent condition left over after the incumbent went away no longer
/// holds anything back
fn clear_incumbent_condition(
    conditions: &mut [ReleaseStrategyCondition],
    type_: StrategyConditionType,
    step: i32,
    now: DateTime<Utc>,
) {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) else {
        return;
    };
    if existing.status != ConditionStatus::True {
        existing.last_transition_time = Some(condition_timestamp(now));
    }
    existing.status = ConditionStatus::True;
    existing.step = step;
    existing.reason = Some("NoIncumbent".to_string());
    existing.message = Some("release has no incumbent".to_string());
}

/// Status of an incumbent or retired release: nothing pending, achieved step
/// untouched
pub fn settled_status(release: &Release, now: DateTime<Utc>) -> ReleaseStatus {
    let mut status = release.status.clone().unwrap_or_default();
    let mut strategy_status = status.strategy.take().unwrap_or_else(ReleaseStrategyStatus::default);
    strategy_status.state = super::strategy::settled_state();
    status.strategy = Some(strategy_status);
    unblock(&mut status.conditions, now);
    status
}

/// Status of a release whose strategy or target step is unusable
pub fn blocked_status(release: &Release, reason: &str, message: String, now: DateTime<Utc>) -> ReleaseStatus {
    let mut status = release.status.clone().unwrap_or_default();
    set_release_condition(
        &mut status.conditions,
        ReleaseConditionType::Blocked,
        ConditionStatus::True,
        Some(reason),
        Some(message),
        now,
    );
    status
}

/// Clear a previous Blocked condition once the release is usable again
fn unblock(conditions: &mut Vec<ReleaseCondition>, now: DateTime<Utc>) {
    if conditions
        .iter()
        .any(|c| c.type_ == ReleaseConditionType::Blocked)
    {
        set_release_condition(
            conditions,
            ReleaseConditionType::Blocked,
            ConditionStatus::False,
            None,
            None,
            now,
        );
    }
}

/// Merge-patch body replacing the whole status
pub fn status_patch(status: &ReleaseStatus) -> Result<serde_json::Value, serde_json::Error> {
    Ok(serde_json::json!({ "status": serde_json::to_value(status)? }))
}
