//! Per-connection session lifecycle
//!
//! A session binds exactly one transport, reads its messages in arrival order, waits for the
//! client to declare its capabilities, optionally fetches roots, and keeps the connection alive
//! with periodic pings until it is closed.

mod peer;

pub use peer::{Peer, PeerError};

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock},
    time::Duration,
};

use rust_mcp_sdk::schema::{
    ClientCapabilities, Implementation, ListRootsResult, LoggingLevel, Root,
};
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::broadcast, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::RequestContext,
    errors::ErrorCode,
    mcp::{
        protocol::{methods, supports_roots_list_changed},
        rpc::json_rpc_error,
        server::handle_json_rpc_value,
    },
    registry::Registry,
    server::ServerInfo,
    transport::{Transport, TransportError},
};

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is already connected to a transport")]
    AlreadyConnected,
    #[error("session is closed")]
    SessionClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Negotiating,
    Active,
    Closed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    RootsChanged(Vec<Root>),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capabilities_poll_interval: Duration,
    pub capabilities_poll_attempts: u32,
    pub keepalive_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capabilities_poll_interval: Duration::from_millis(100),
            capabilities_poll_attempts: 10,
            keepalive_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(10),
        }
    }
}

pub struct Session {
    id: String,
    registry: Arc<Registry>,
    server_info: Arc<ServerInfo>,
    auth: Option<Value>,
    config: SessionConfig,
    state: Mutex<SessionState>,
    client_capabilities: OnceLock<ClientCapabilities>,
    client_info: OnceLock<Implementation>,
    protocol_version: OnceLock<String>,
    logging_level: Mutex<LoggingLevel>,
    roots: RwLock<Vec<Root>>,
    peer: OnceLock<Peer>,
    events: broadcast::Sender<SessionEvent>,
    closed: CancellationToken,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        registry: Arc<Registry>,
        server_info: Arc<ServerInfo>,
        auth: Option<Value>,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            registry,
            server_info,
            auth,
            config,
            state: Mutex::new(SessionState::Unconnected),
            client_capabilities: OnceLock::new(),
            client_info: OnceLock::new(),
            protocol_version: OnceLock::new(),
            logging_level: Mutex::new(LoggingLevel::Info),
            roots: RwLock::new(Vec::new()),
            peer: OnceLock::new(),
            events,
            closed: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn auth(&self) -> Option<&Value> {
        self.auth.as_ref()
    }

    pub fn client_capabilities(&self) -> Option<&ClientCapabilities> {
        self.client_capabilities.get()
    }

    pub fn client_info(&self) -> Option<&Implementation> {
        self.client_info.get()
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.get().map(String::as_str)
    }

    pub fn logging_level(&self) -> LoggingLevel {
        *lock(&self.logging_level)
    }

    pub fn roots(&self) -> Vec<Root> {
        self.roots
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn peer(&self) -> Option<&Peer> {
        self.peer.get()
    }

    /// Dropping the receiver ends the subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Resolves once the session has been closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Binds `transport`, negotiates with the client and starts the keepalive.
    ///
    /// Returns once negotiation has finished or given up; the session keeps serving in the
    /// background until it is closed.
    pub async fn connect(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<(), SessionError> {
        {
            let mut state = lock(&self.state);
            match *state {
                SessionState::Unconnected => *state = SessionState::Negotiating,
                SessionState::Closed => return Err(SessionError::SessionClosed),
                SessionState::Negotiating | SessionState::Active => {
                    return Err(SessionError::AlreadyConnected)
                }
            }
        }

        let peer = Peer::new(transport, self.config.request_timeout);
        if self.peer.set(peer.clone()).is_err() {
            return Err(SessionError::AlreadyConnected);
        }
        info!(session_id = %self.id, transport = peer.transport().kind(), "session connected");

        tokio::spawn(Arc::clone(self).serve(peer.clone()));

        match self.await_client_capabilities().await {
            Some(capabilities) if supports_roots_list_changed(&capabilities) => {
                if let Err(err) = self.fetch_roots().await {
                    warn!(session_id = %self.id, error = %err, "initial roots/list failed");
                    self.emit(SessionEvent::Error(err.to_string()));
                }
            }
            Some(_) => {}
            None if self.is_closed() => {}
            None => warn!(
                session_id = %self.id,
                "client did not declare capabilities in time; continuing without them"
            ),
        }

        {
            let mut state = lock(&self.state);
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Active;
        }
        self.spawn_keepalive(peer);
        Ok(())
    }

    /// Stops keepalive and closes the transport. Calling it again does nothing.
    pub async fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }
        self.closed.cancel();

        if let Some(peer) = self.peer.get() {
            peer.fail_pending();
            if let Err(err) = peer.transport().close().await {
                warn!(session_id = %self.id, error = %err, "failed to close transport");
            }
        }
        info!(session_id = %self.id, "session closed");
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub(crate) fn request_context(&self) -> RequestContext {
        RequestContext {
            auth: self.auth.clone(),
            peer: self.peer.get().cloned(),
        }
    }

    /// Records what the client sent in `initialize`. Only the first call has any effect.
    pub(crate) fn record_client(
        &self,
        capabilities: ClientCapabilities,
        client_info: Implementation,
        protocol_version: &str,
    ) {
        if self.client_capabilities.set(capabilities).is_err() {
            debug!(session_id = %self.id, "ignoring repeated client capabilities");
            return;
        }
        info!(
            session_id = %self.id,
            client = %client_info.name,
            client_version = %client_info.version,
            protocol_version,
            "client initialized"
        );
        let _ = self.client_info.set(client_info);
        let _ = self.protocol_version.set(protocol_version.to_string());
    }

    pub(crate) fn set_logging_level(&self, level: LoggingLevel) {
        *lock(&self.logging_level) = level;
        debug!(session_id = %self.id, level = %level, "logging level updated");
    }

    /// Re-fetches roots in the background and announces the new list.
    pub(crate) fn spawn_roots_refresh(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            match session.fetch_roots().await {
                Ok(roots) => session.emit(SessionEvent::RootsChanged(roots)),
                Err(err) => {
                    warn!(session_id = %session.id, error = %err, "roots refresh failed");
                    session.emit(SessionEvent::Error(err.to_string()));
                }
            }
        });
    }

    async fn fetch_roots(&self) -> Result<Vec<Root>, PeerError> {
        let peer = self.peer.get().ok_or(PeerError::Disconnected)?;
        let result = peer.request(methods::ROOTS_LIST, None).await?;
        let listed: ListRootsResult =
            serde_json::from_value(result).map_err(|err| PeerError::Malformed {
                method: methods::ROOTS_LIST.to_string(),
                message: err.to_string(),
            })?;

        *self
            .roots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = listed.roots.clone();
        debug!(session_id = %self.id, count = listed.roots.len(), "roots updated");
        Ok(listed.roots)
    }

    async fn await_client_capabilities(&self) -> Option<ClientCapabilities> {
        for _ in 0..self.config.capabilities_poll_attempts {
            if let Some(capabilities) = self.client_capabilities.get() {
                return Some(capabilities.clone());
            }
            tokio::select! {
                _ = self.closed.cancelled() => return None,
                _ = tokio::time::sleep(self.config.capabilities_poll_interval) => {}
            }
        }
        self.client_capabilities.get().cloned()
    }

    /// Reads and answers inbound messages one at a time until the transport ends.
    async fn serve(self: Arc<Self>, peer: Peer) {
        loop {
            let message = tokio::select! {
                _ = self.closed.cancelled() => break,
                message = peer.transport().recv() => message,
            };

            let response = match message {
                Ok(Some(payload)) => handle_json_rpc_value(&self, payload).await,
                Ok(None) => {
                    debug!(session_id = %self.id, "transport reached end of stream");
                    break;
                }
                Err(TransportError::Decode(reason)) => {
                    debug!(session_id = %self.id, %reason, "undecodable inbound message");
                    Some(json_rpc_error(None, ErrorCode::ParseError.code(), "Parse error"))
                }
                Err(err) => {
                    warn!(session_id = %self.id, error = %err, "transport receive failed");
                    break;
                }
            };

            if let Some(response) = response {
                if let Err(err) = peer.send(response).await {
                    warn!(session_id = %self.id, error = %err, "failed to send response");
                    break;
                }
            }
        }

        self.close().await;
    }

    fn spawn_keepalive(self: &Arc<Self>, peer: Peer) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(session.config.keepalive_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = session.closed.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(err) = peer.request(methods::PING, None).await {
                    if session.is_closed() {
                        break;
                    }
                    warn!(session_id = %session.id, error = %err, "keepalive ping failed");
                    session.emit(SessionEvent::Error(err.to_string()));
                }
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::transport::MemoryTransport;

    fn test_session() -> Arc<Session> {
        Session::new(
            Arc::new(Registry::default()),
            Arc::new(ServerInfo::new("test-server", "1.0.0")),
            None,
            SessionConfig::default(),
        )
    }

    async fn next_message(client: &MemoryTransport) -> Value {
        client.recv().await.expect("recv").expect("message")
    }

    /// Skips keepalive pings, answering them, until a non-ping message arrives.
    async fn next_non_ping(client: &MemoryTransport) -> Value {
        loop {
            let message = next_message(client).await;
            if message["method"] == "ping" {
                client
                    .send(json!({"jsonrpc": "2.0", "id": message["id"], "result": {}}))
                    .await
                    .expect("answer ping");
                continue;
            }
            return message;
        }
    }

    fn initialize_request(capabilities: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": capabilities,
                "clientInfo": {"name": "test-client", "version": "0.1.0"}
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_is_rejected() {
        let session = test_session();
        let (_client, server) = MemoryTransport::pair();
        session.connect(Arc::new(server)).await.expect("first connect");

        let (_other_client, other_server) = MemoryTransport::pair();
        let err = session
            .connect(Arc::new(other_server))
            .await
            .expect_err("second connect");
        assert_eq!(err, SessionError::AlreadyConnected);
        session.close().await;
    }

    #[tokio::test]
    async fn connect_after_close_is_rejected_and_close_is_idempotent() {
        let session = test_session();
        session.close().await;
        session.close().await;

        let (_client, server) = MemoryTransport::pair();
        let err = session
            .connect(Arc::new(server))
            .await
            .expect_err("closed session");
        assert_eq!(err, SessionError::SessionClosed);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn negotiation_fetches_roots_when_client_supports_them() {
        let session = test_session();
        let (client, server) = MemoryTransport::pair();
        let connecting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.connect(Arc::new(server)).await })
        };

        client
            .send(initialize_request(json!({"roots": {"listChanged": true}})))
            .await
            .expect("send initialize");
        let response = next_message(&client).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["protocolVersion"], "2025-03-26");

        let roots_request = next_message(&client).await;
        assert_eq!(roots_request["method"], "roots/list");
        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": roots_request["id"],
                "result": {"roots": [{"uri": "file:///workspace", "name": "workspace"}]}
            }))
            .await
            .expect("send roots");

        connecting.await.expect("join").expect("connect");
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.roots()[0].uri, "file:///workspace");
        assert_eq!(
            session.client_info().map(|info| info.name.as_str()),
            Some("test-client")
        );
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_capabilities_do_not_block_activation() {
        let session = test_session();
        let (client, server) = MemoryTransport::pair();

        session.connect(Arc::new(server)).await.expect("connect");
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.client_capabilities().is_none());

        let ping = next_message(&client).await;
        assert_eq!(ping["method"], "ping");
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_keepalive_reports_error_without_closing() {
        let session = Session::new(
            Arc::new(Registry::default()),
            Arc::new(ServerInfo::new("test-server", "1.0.0")),
            None,
            SessionConfig {
                request_timeout: Duration::from_millis(200),
                ..SessionConfig::default()
            },
        );
        let mut events = session.subscribe();
        let (client, server) = MemoryTransport::pair();
        session.connect(Arc::new(server)).await.expect("connect");

        let ping = next_message(&client).await;
        assert_eq!(ping["method"], "ping");

        let event = events.recv().await.expect("event");
        assert!(matches!(event, SessionEvent::Error(_)));
        assert_eq!(session.state(), SessionState::Active);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn roots_list_changed_refetches_and_emits_event() {
        let session = test_session();
        let mut events = session.subscribe();
        let (client, server) = MemoryTransport::pair();
        session.connect(Arc::new(server)).await.expect("connect");

        client
            .send(json!({"jsonrpc": "2.0", "method": "notifications/roots/list_changed"}))
            .await
            .expect("notify");

        let request = next_non_ping(&client).await;
        assert_eq!(request["method"], "roots/list");
        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "result": {"roots": [{"uri": "file:///repo"}]}
            }))
            .await
            .expect("answer roots");

        loop {
            match events.recv().await.expect("event") {
                SessionEvent::RootsChanged(roots) => {
                    assert_eq!(roots.len(), 1);
                    assert_eq!(roots[0].uri, "file:///repo");
                    assert_eq!(roots[0].name, None);
                    break;
                }
                SessionEvent::Error(_) => continue,
            }
        }
        assert_eq!(session.roots().len(), 1);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn transport_end_closes_session() {
        let session = test_session();
        let (client, server) = MemoryTransport::pair();
        session.connect(Arc::new(server)).await.expect("connect");

        client.close().await.expect("close client");
        session.closed().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_answered_over_the_transport() {
        let session = test_session();
        let (client, server) = MemoryTransport::pair();
        session.connect(Arc::new(server)).await.expect("connect");

        client
            .send(json!({"jsonrpc": "2.0", "id": 9, "method": "no/such/method"}))
            .await
            .expect("send");
        let response = next_non_ping(&client).await;
        assert_eq!(response["error"]["code"], -32601);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_leaves_session_active() {
        use crate::{
            domain::resources::{Resource, ResourceOutput},
            errors::HandlerError,
        };

        let mut registry = Registry::default();
        registry
            .add_resource(Resource::new("file:///flaky", "Flaky", || async {
                if true {
                    panic!("disk vanished");
                }
                Ok::<_, HandlerError>(ResourceOutput::from("unreachable"))
            }))
            .expect("register resource");
        let session = Session::new(
            Arc::new(registry),
            Arc::new(ServerInfo::new("test-server", "1.0.0")),
            None,
            SessionConfig::default(),
        );
        let (client, server) = MemoryTransport::pair();
        session.connect(Arc::new(server)).await.expect("connect");

        client
            .send(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "resources/read",
                "params": {"uri": "file:///flaky"}
            }))
            .await
            .expect("send read");
        let response = next_non_ping(&client).await;
        assert_eq!(response["id"], 1);
        assert_eq!(response["error"]["code"], -32603);

        client
            .send(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))
            .await
            .expect("send ping");
        let pong = next_non_ping(&client).await;
        assert_eq!(pong["id"], 2);
        assert_eq!(session.state(), SessionState::Active);
        session.close().await;
    }
}
