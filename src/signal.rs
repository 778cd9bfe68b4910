//! Signal handling for graceful shutdown.
//!
//! SIGINT and SIGTERM (Ctrl-C on Windows) stop the control API from
//! accepting new connections. Firewall rules stay in place.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Global flag indicating whether a shutdown has been requested.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if shutdown has been requested.
#[inline]
pub fn is_shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Request a shutdown (can be called from signal handlers or tests).
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Reset shutdown flag (mainly for testing).
#[cfg(test)]
pub fn reset_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::Relaxed);
}

/// Resolves once a termination signal arrives.
///
/// If no handler can be registered (restricted environments) this never
/// resolves and the agent runs until killed.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to register SIGINT handler: {}", e);
            None
        }
    };

    let sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            None
        }
    };

    match (sigint, sigterm) {
        (Some(mut int), Some(mut term)) => {
            tokio::select! {
                _ = int.recv() => info!("Received SIGINT, stopping control API..."),
                _ = term.recv() => info!("Received SIGTERM, stopping control API..."),
            }
        }
        (Some(mut int), None) => {
            int.recv().await;
            info!("Received SIGINT, stopping control API...");
        }
        (None, Some(mut term)) => {
            term.recv().await;
            info!("Received SIGTERM, stopping control API...");
        }
        (None, None) => {
            warn!("No signal handlers registered - graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }

    request_shutdown();
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl-C, stopping control API..."),
        Err(e) => {
            warn!("Failed to register Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
    request_shutdown();
}
