//! OS signal handling for graceful shutdown.

use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

use crate::services::manager::ServiceManager;

/// Block until SIGINT or SIGTERM, then shut down all services, waiting at
/// most `shutdown_timeout` seconds.
pub async fn handle_shutdown_signals(
    manager: ServiceManager,
    shutdown_timeout: u64,
) -> ExitCode {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = ?e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }

    let timeout = Duration::from_secs(shutdown_timeout);
    info!(timeout_secs = shutdown_timeout, "shutting down services");
    manager.shutdown(timeout).await;
    ExitCode::SUCCESS
}
