//! shipper: multi-cluster progressive-delivery coordinator
//!
//! Moves each Release through its rollout strategy by writing per-cluster
//! capacity, traffic and installation targets, and folds what the clusters
//! report back into the Release status.

pub mod backoff;
pub mod clusterstore;
pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;
