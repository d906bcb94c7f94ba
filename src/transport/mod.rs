//! Message transports carrying JSON-RPC values between the server and one peer
//!
//! A transport only moves decoded JSON values; framing is its own business. The session
//! engine owns everything above that.

pub mod memory;
pub mod sse;
pub mod stdio;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("failed to decode inbound message: {0}")]
    Decode(String),
    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes one message to the peer.
    async fn send(&self, message: Value) -> Result<(), TransportError>;

    /// Waits for the next inbound message. `Ok(None)` means the peer went away.
    ///
    /// A [`TransportError::Decode`] is recoverable: the caller may answer with a parse error
    /// and keep reading.
    async fn recv(&self) -> Result<Option<Value>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    fn kind(&self) -> &'static str;
}
