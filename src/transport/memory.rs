//! In-process transport pair, mostly for driving sessions in tests.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::{Transport, TransportError};

pub struct MemoryTransport {
    sender: mpsc::UnboundedSender<Value>,
    receiver: Mutex<mpsc::UnboundedReceiver<Value>>,
    closed: CancellationToken,
}

impl MemoryTransport {
    /// Creates two connected ends; what one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let left = Self {
            sender: right_tx,
            receiver: Mutex::new(left_rx),
            closed: closed.clone(),
        };
        let right = Self {
            sender: left_tx,
            receiver: Mutex::new(right_rx),
            closed,
        };

        (left, right)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.sender.send(message).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            message = receiver.recv() => Ok(message),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn messages_cross_between_ends() {
        let (client, server) = MemoryTransport::pair();

        client
            .send(json!({"jsonrpc": "2.0", "method": "ping", "id": 1}))
            .await
            .expect("send");
        let received = server.recv().await.expect("recv").expect("message");
        assert_eq!(received["method"], "ping");
    }

    #[tokio::test]
    async fn closing_either_end_ends_both() {
        let (client, server) = MemoryTransport::pair();
        server.close().await.expect("close");

        assert!(client.is_closed());
        assert!(client.recv().await.expect("recv").is_none());
        assert!(matches!(
            client.send(json!({})).await,
            Err(TransportError::Closed)
        ));
    }
}
