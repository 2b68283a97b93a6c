//! HTTP service: binds the listener and serves the API router.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::info;

use crate::services::Service;
use crate::state::{AppState, ServiceStatus};
use crate::web::create_router;

pub struct WebService {
    port: u16,
    app_state: AppState,
    frontend_origin: Option<String>,
}

impl WebService {
    pub fn new(port: u16, app_state: AppState, frontend_origin: Option<String>) -> Self {
        Self {
            port,
            app_state,
            frontend_origin,
        }
    }
}

#[async_trait]
impl Service for WebService {
    async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let statuses = self.app_state.service_statuses.clone();
        statuses.set("web", ServiceStatus::Starting);

        let router = create_router(self.app_state.clone(), self.frontend_origin.as_deref());

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            statuses.set("web", ServiceStatus::Error);
            anyhow::Error::new(e).context(format!("failed to bind {addr}"))
        })?;

        info!(%addr, "web server listening");
        statuses.set("web", ServiceStatus::Active);

        // ConnectInfo is required by the client-IP extractor.
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await?;

        info!("web server stopped");
        Ok(())
    }
}
