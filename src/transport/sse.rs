//! Server-Sent Events transport.
//!
//! Outbound messages are queued for the SSE response stream owned by the HTTP layer; inbound
//! messages arrive through the companion `POST` endpoint. Both halves share a cancellation
//! token, so a dropped stream and a closed session end each other.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportError};

const INBOUND_BUFFER: usize = 64;

pub struct SseTransport {
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Mutex<mpsc::Receiver<Value>>,
    closed: CancellationToken,
}

/// The HTTP-facing ends of an [`SseTransport`].
pub struct SseChannels {
    pub outbound: mpsc::UnboundedReceiver<Value>,
    pub inbound: mpsc::Sender<Value>,
    pub closed: CancellationToken,
}

impl SseTransport {
    pub fn new() -> (Self, SseChannels) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let closed = CancellationToken::new();

        let transport = Self {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
            closed: closed.clone(),
        };
        let channels = SseChannels {
            outbound: outbound_rx,
            inbound: inbound_tx,
            closed,
        };

        (transport, channels)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(message)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            message = inbound.recv() => Ok(message),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "sse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn inbound_posts_reach_recv() {
        let (transport, channels) = SseTransport::new();
        channels
            .inbound
            .send(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
            .await
            .expect("post");

        let message = transport.recv().await.expect("recv").expect("message");
        assert_eq!(message["id"], 1);
    }

    #[tokio::test]
    async fn outbound_messages_are_queued_for_the_stream() {
        let (transport, mut channels) = SseTransport::new();
        transport
            .send(json!({"jsonrpc": "2.0", "method": "notifications/message"}))
            .await
            .expect("send");

        let queued = channels.outbound.recv().await.expect("queued message");
        assert_eq!(queued["method"], "notifications/message");
    }

    #[tokio::test]
    async fn dropped_stream_cancels_transport() {
        let (transport, channels) = SseTransport::new();
        let guard = channels.closed.clone().drop_guard();
        drop(guard);

        assert!(transport.recv().await.expect("recv").is_none());
        assert!(matches!(
            transport.send(json!({})).await,
            Err(TransportError::Closed)
        ));
    }
}
