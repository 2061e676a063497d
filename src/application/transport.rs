// Transport seam - contract for the external publish/subscribe client
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::MonitorError;

/// Connection lifecycle and delivery events reported by a transport.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Result of a connect attempt; code 0 means success.
    Connected { code: i32 },
    /// The broker link dropped.
    Disconnected { code: i32 },
    /// A payload arrived on a subscribed topic.
    Message { topic: String, payload: Bytes },
}

/// Publish/subscribe client abstraction. Implementations own everything
/// below the session: socket handling, keepalive, TLS, reconnect policy.
/// Events are delivered on the transport's own task, at arbitrary times
/// relative to the consumer of this crate.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin a connect attempt. Events for the attempt (and for the session
    /// it establishes) arrive on the returned receiver.
    async fn connect(&self) -> Result<mpsc::Receiver<TransportEvent>, MonitorError>;

    async fn subscribe(&self, topic: &str) -> Result<(), MonitorError>;

    /// Fire-and-forget publish; delivery guarantees are the transport's
    /// quality-of-service concern.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), MonitorError>;

    async fn disconnect(&self) -> Result<(), MonitorError>;
}
