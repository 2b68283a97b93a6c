pub mod manager;
pub mod signals;
pub mod web;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// A long-running component owned by the [`manager::ServiceManager`].
///
/// `run` should return promptly once the shutdown receiver fires; the
/// manager aborts stragglers after the configured timeout.
#[async_trait]
pub trait Service: Send {
    async fn run(&mut self, shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()>;
}
