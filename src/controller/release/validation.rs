use crate::crd::RolloutStrategy;
use thiserror::Error;

/// Misconfigurations that only an operator can fix
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),

    #[error("target step {step} is out of range for a strategy with {steps} steps")]
    InvalidTargetStep { step: i32, steps: usize },
}

impl StrategyError {
    /// Reason recorded on the Blocked release condition
    pub fn reason(&self) -> &'static str {
        match self {
            StrategyError::InvalidStrategy(_) => "InvalidStrategy",
            StrategyError::InvalidTargetStep { .. } => "InvalidTargetStep",
        }
    }
}

/// Validate a frozen strategy snapshot
///
/// # Validation Rules
/// - at least one step
/// - every step has a name
/// - every capacity and traffic value is within 0-100
pub fn validate_strategy(strategy: &RolloutStrategy) -> Result<(), StrategyError> {
    if strategy.steps.is_empty() {
        return Err(StrategyError::InvalidStrategy(
            "strategy must have at least one step".to_string(),
        ));
    }

    for (i, step) in strategy.steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(StrategyError::InvalidStrategy(format!(
                "steps[{}].name cannot be empty",
                i
            )));
        }

        let values = [
            ("capacity.incumbent", step.capacity.incumbent),
            ("capacity.contender", step.capacity.contender),
            ("traffic.incumbent", step.traffic.incumbent),
            ("traffic.contender", step.traffic.contender),
        ];
        for (field, value) in values {
            if !(0..=100).contains(&value) {
                return Err(StrategyError::InvalidStrategy(format!(
                    "steps[{}].{} must be 0-100, got {}",
                    i, field, value
                )));
            }
        }
    }

    Ok(())
}

/// Validate the strategy and resolve `target_step` to a step index
pub fn validate_target_step(
    strategy: &RolloutStrategy,
    target_step: i32,
) -> Result<usize, StrategyError> {
    validate_strategy(strategy)?;

    usize::try_from(target_step)
        .ok()
        .filter(|step| *step < strategy.steps.len())
        .ok_or(StrategyError::InvalidTargetStep {
            step: target_step,
            steps: strategy.steps.len(),
        })
}
