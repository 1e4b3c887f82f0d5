//! Rollout strategy coordinator
//!
//! Drives each Release towards its target step by writing per-cluster target
//! objects and folding their reported status back into the Release.

pub mod reconcile;
pub mod role;
pub mod status;
pub mod strategy;
pub mod targets;
pub mod validation;

pub use reconcile::{error_policy, reconcile, Context, ReconcileError, AGENT};
pub use role::{Role, RoleError};
pub use validation::StrategyError;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Tests can use unwrap/expect for brevity
#[path = "release_test.rs"]
mod tests;
