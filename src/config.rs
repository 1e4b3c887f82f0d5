//! Controller configuration from `SHIPPER_*` environment variables
//!
//! Every setting has a default; a value that does not parse is logged and
//! replaced by the default rather than aborting startup.

use crate::crd::DEFAULT_SECRETS_NAMESPACE;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_HEALTH_PORT: u16 = 8080;
pub const DEFAULT_RESYNC_SECONDS: u64 = 30;
pub const DEFAULT_BACKOFF_BASE_SECONDS: u64 = 1;
pub const DEFAULT_BACKOFF_MAX_SECONDS: u64 = 60;
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_CLIENT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace holding per-cluster credential Secrets
    pub secrets_namespace: String,
    pub health_port: u16,
    /// Periodic requeue of every Release
    pub resync_interval: Duration,
    pub cluster_backoff_base: Duration,
    pub cluster_backoff_max: Duration,
    /// Upper bound on a cluster's initial cache sync
    pub cache_sync_timeout: Duration,
    /// Connect and read timeout of per-cluster clients
    pub client_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            secrets_namespace: DEFAULT_SECRETS_NAMESPACE.to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_SECONDS),
            cluster_backoff_base: Duration::from_secs(DEFAULT_BACKOFF_BASE_SECONDS),
            cluster_backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECONDS),
            cache_sync_timeout: Duration::from_secs(DEFAULT_CACHE_SYNC_TIMEOUT_SECONDS),
            client_timeout: Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECONDS),
        }
    }
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let secrets_namespace = lookup("SHIPPER_NAMESPACE")
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or(defaults.secrets_namespace);

        let seconds = |key: &str, default: Duration| -> Duration {
            Duration::from_secs(parse_or_default(&lookup, key, default.as_secs()))
        };

        let mut config = Self {
            secrets_namespace,
            health_port: parse_or_default(&lookup, "SHIPPER_HEALTH_PORT", defaults.health_port),
            resync_interval: seconds("SHIPPER_RESYNC_SECONDS", defaults.resync_interval),
            cluster_backoff_base: seconds(
                "SHIPPER_CLUSTER_BACKOFF_BASE_SECONDS",
                defaults.cluster_backoff_base,
            ),
            cluster_backoff_max: seconds(
                "SHIPPER_CLUSTER_BACKOFF_MAX_SECONDS",
                defaults.cluster_backoff_max,
            ),
            cache_sync_timeout: seconds(
                "SHIPPER_CACHE_SYNC_TIMEOUT_SECONDS",
                defaults.cache_sync_timeout,
            ),
            client_timeout: seconds("SHIPPER_CLIENT_TIMEOUT_SECONDS", defaults.client_timeout),
        };

        if config.cluster_backoff_max < config.cluster_backoff_base {
            warn!(
                base = ?config.cluster_backoff_base,
                max = ?config.cluster_backoff_max,
                "Cluster backoff max is below base, using base as max"
            );
            config.cluster_backoff_max = config.cluster_backoff_base;
        }

        config
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(variable = key, value = %raw, "Invalid value, using default");
                default
            }
        },
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
