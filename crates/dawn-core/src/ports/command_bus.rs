//! Command bus port: publish-and-await-reply to the device-control plane.
//!
//! A worker that extracted a `<command>` block registers a pending-reply
//! slot (keyed by a request id it attaches to the published payload), then
//! awaits the reply with a timeout, the only explicit timeout in the core.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum CommandBusError {
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("reply channel closed")]
    Closed,
}

/// An awaitable reply slot returned by [`CommandBus::register`].
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<serde_json::Value>,
}

impl PendingReply {
    #[must_use]
    pub fn new(rx: oneshot::Receiver<serde_json::Value>) -> Self {
        Self { rx }
    }

    /// Wait for the reply, failing after `timeout`.
    pub async fn wait(self, timeout: Duration) -> Result<serde_json::Value, CommandBusError> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CommandBusError::Closed),
            Err(_) => Err(CommandBusError::Timeout(timeout)),
        }
    }
}

/// Port for the external command bus.
#[async_trait]
pub trait CommandBus: Send + Sync {
    /// Publish a payload on a topic. The payload already carries the
    /// request id the reply will rendezvous on.
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<(), CommandBusError>;

    /// Register a reply slot for `request_id` before publishing.
    fn register(&self, request_id: u64) -> PendingReply;
}
