//! Graceful shutdown handling
//!
//! SIGTERM and SIGINT, or the Release controller stream ending, trip one
//! `ShutdownController`. The cluster registration watch and every per-cluster
//! connect loop observe its `ShutdownSignal`; `drain_clusters` then drops
//! every cluster client and workload cache.

use crate::clusterstore::ClusterStore;
use std::fmt;
use tokio::sync::watch;
use tracing::info;

/// Why the coordinator is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Termination signal from the OS, by name
    Signal(&'static str),
    /// The Release controller stream ended on its own
    ControllerStopped,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(name) => write!(f, "received {name}"),
            ShutdownReason::ControllerStopped => f.write_str("controller stream ended"),
        }
    }
}

/// Receiving side, cloned into every long-running task
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownSignal {
    /// Wait until shutdown is triggered
    ///
    /// Returns `None` when the controller was dropped without a reason,
    /// which also counts as shutdown.
    pub async fn wait(&mut self) -> Option<ShutdownReason> {
        loop {
            if let Some(reason) = *self.receiver.borrow() {
                return Some(reason);
            }
            if self.receiver.changed().await.is_err() {
                return *self.receiver.borrow();
            }
        }
    }

    /// Check if shutdown was signaled (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.receiver.borrow()
    }
}

/// Sending side, owned by `main`
pub struct ShutdownController {
    sender: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownController {
    /// Trigger shutdown; only the first reason is kept
    pub fn shutdown(&self, reason: ShutdownReason) {
        let first = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(reason = %reason, "Shutdown signal sent");
        }
    }

    /// Another receiver for a task started after the channel
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Trigger shutdown and tear down every per-cluster client
    ///
    /// Connect loops see the signal first, so none of them can publish a
    /// fresh client into the emptied store.
    pub fn drain_clusters(&self, reason: ShutdownReason, clusters: &ClusterStore) {
        self.shutdown(reason);
        clusters.stop_all();
    }
}

/// Create a new shutdown signal pair
///
/// Returns (controller, signal) where:
/// - controller: Used to trigger shutdown
/// - signal: Cloned and passed to components that need to listen
pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(None);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Wait for SIGTERM or SIGINT
///
/// # Panics
/// Panics if signal handlers cannot be registered (OS resource exhaustion).
#[cfg(unix)]
pub async fn wait_for_signal() -> ShutdownReason {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to register SIGTERM handler");
            panic!("Cannot register SIGTERM handler: {}", e);
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "Failed to register SIGINT handler");
            panic!("Cannot register SIGINT handler: {}", e);
        }
    };

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!(signal = name, "Received termination signal");
    ShutdownReason::Signal(name)
}

/// Wait for Ctrl+C (Windows)
///
/// # Panics
/// Panics if Ctrl+C handler cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> ShutdownReason {
    use tracing::error;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to wait for Ctrl+C");
        panic!("Cannot wait for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C");
    ShutdownReason::Signal("CTRL_C")
}
