pub mod aggregate;
pub mod clock;
pub mod release;
pub mod replicas;

pub use release::{error_policy, reconcile, Context, ReconcileError};
