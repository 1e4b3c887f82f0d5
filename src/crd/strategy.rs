use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Ordered rollout plan copied into every Release at creation time
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RolloutStrategy {
    /// Steps in rollout order (index 0 is the first step)
    #[serde(default)]
    pub steps: Vec<RolloutStrategyStep>,
}

impl RolloutStrategy {
    /// Index of the final step, `None` for an empty strategy
    pub fn last_step_index(&self) -> Option<usize> {
        self.steps.len().checked_sub(1)
    }
}

/// A single strategy step: capacity and traffic shares for both releases
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct RolloutStrategyStep {
    /// Human-readable step name (e.g. "staging", "50/50", "full on")
    pub name: String,

    /// Percentage of the total replica count each release should run
    pub capacity: RolloutStrategyStepValue,

    /// Share of traffic each release should receive
    pub traffic: RolloutStrategyStepValue,
}

/// Incumbent/contender pair, each in [0, 100]
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RolloutStrategyStepValue {
    pub incumbent: i32,
    pub contender: i32,
}

/// Value of a `waitingFor*` flag in the release strategy state
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum StrategyState {
    True,
    False,
    #[default]
    Unknown,
}

impl From<bool> for StrategyState {
    fn from(value: bool) -> Self {
        if value {
            StrategyState::True
        } else {
            StrategyState::False
        }
    }
}

impl std::fmt::Display for StrategyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyState::True => write!(f, "True"),
            StrategyState::False => write!(f, "False"),
            StrategyState::Unknown => write!(f, "Unknown"),
        }
    }
}
