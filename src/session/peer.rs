//! Outbound side of a session: notifications and server-originated requests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    errors::McpError,
    mcp::rpc::{
        json_rpc_error_to_mcp_error, json_rpc_notification, json_rpc_request, params_object,
    },
    transport::{Transport, TransportError},
};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("peer did not answer `{method}` within {timeout:?}")]
    Timeout { method: String, timeout: Duration },
    #[error("peer rejected request: {0}")]
    Rejected(McpError),
    #[error("connection closed before the peer answered")]
    Disconnected,
    #[error("peer answered `{method}` with an unexpected shape: {message}")]
    Malformed { method: String, message: String },
}

type PendingResponse = oneshot::Sender<Result<Value, McpError>>;

/// Cloneable handle for talking back to the connected client.
#[derive(Clone)]
pub struct Peer {
    inner: Arc<PeerInner>,
}

struct PeerInner {
    transport: Arc<dyn Transport>,
    pending: Mutex<HashMap<i64, PendingResponse>>,
    next_id: AtomicI64,
    request_timeout: Duration,
}

impl Peer {
    pub fn new(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PeerInner {
                transport,
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                request_timeout,
            }),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub async fn send(&self, message: Value) -> Result<(), TransportError> {
        self.inner.transport.send(message).await
    }

    pub async fn notify<P: Serialize>(&self, method: &str, params: &P) -> Result<(), TransportError> {
        self.send(json_rpc_notification(method, params_object(params))).await
    }

    /// Sends a request to the client and waits for its response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Value, PeerError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        if let Err(err) = self.send(json_rpc_request(id, method, params)).await {
            self.pending().remove(&id);
            return Err(err.into());
        }

        let timeout = self.inner.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(err))) => Err(PeerError::Rejected(err)),
            Ok(Err(_)) => Err(PeerError::Disconnected),
            Err(_) => {
                self.pending().remove(&id);
                Err(PeerError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Routes a response message to the request waiting on it.
    ///
    /// Returns `false` when no request with that id is outstanding.
    pub(crate) fn resolve(&self, response: &Value) -> bool {
        let Some(id) = response.get("id").and_then(Value::as_i64) else {
            return false;
        };
        let Some(waiter) = self.pending().remove(&id) else {
            debug!(id, "response for unknown or expired request");
            return false;
        };

        let outcome = match response.get("error") {
            Some(error) => Err(json_rpc_error_to_mcp_error(error)),
            None => Ok(response.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = waiter.send(outcome);
        true
    }

    /// Drops every outstanding request so their callers see `Disconnected`.
    pub(crate) fn fail_pending(&self) {
        self.pending().clear();
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<i64, PendingResponse>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
