//! Newline-delimited JSON over the process's standard streams.

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Transport, TransportError};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct StdioTransport {
    reader: Mutex<BufReader<BoxedReader>>,
    writer: Mutex<BoxedWriter>,
    closed: CancellationToken,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self::from_streams(io::stdin(), io::stdout())
    }

    /// Builds the transport over arbitrary streams, e.g. a duplex pipe in tests.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxedReader = Box::new(reader);
        Self {
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(Box::new(writer)),
            closed: CancellationToken::new(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: Value) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads the next non-blank line. A line that is not UTF-8 or not JSON is a `Decode`
    /// error; the stream stays usable for the lines after it.
    async fn recv(&self) -> Result<Option<Value>, TransportError> {
        let mut reader = self.reader.lock().await;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                _ = self.closed.cancelled() => return Ok(None),
                read = reader.read_until(b'\n', &mut line) => read?,
            };

            if read == 0 {
                debug!("stdin reached end of stream");
                return Ok(None);
            }

            let text = std::str::from_utf8(&line)
                .map_err(|err| TransportError::Decode(format!("invalid UTF-8: {err}")))?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|err| TransportError::Decode(err.to_string()));
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        writer.flush().await?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}
