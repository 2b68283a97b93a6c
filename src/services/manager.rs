//! Service lifecycle management: registration, spawning, graceful shutdown.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::services::Service;

pub struct ServiceManager {
    services: Vec<(&'static str, Box<dyn Service>)>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            services: Vec::new(),
            handles: Vec::new(),
            shutdown_tx,
        }
    }

    pub fn register_service(&mut self, name: &'static str, service: Box<dyn Service>) {
        self.services.push((name, service));
    }

    pub fn has_services(&self) -> bool {
        !self.services.is_empty()
    }

    /// Spawn every registered service on its own task.
    pub fn spawn_all(&mut self) {
        for (name, mut service) in self.services.drain(..) {
            let shutdown_rx = self.shutdown_tx.subscribe();
            let handle = tokio::spawn(async move {
                match service.run(shutdown_rx).await {
                    Ok(()) => info!(service = name, "service exited"),
                    Err(e) => error!(service = name, error = ?e, "service failed"),
                }
            });
            self.handles.push((name, handle));
        }
    }

    /// Broadcast shutdown and wait up to `timeout` for services to finish;
    /// stragglers are aborted.
    pub async fn shutdown(self, timeout: Duration) {
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + timeout;
        for (name, mut handle) in self.handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(service = name, error = ?e, "service task panicked"),
                Err(_) => {
                    warn!(service = name, "service did not stop in time, aborting");
                    handle.abort();
                }
            }
        }
        info!("all services stopped");
    }
}
