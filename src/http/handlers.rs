//! Axum HTTP handlers for the web server
//!
//! Provides the SSE session stream, its companion message endpoint, and general metadata
//! endpoints.

use std::{convert::Infallible, sync::Arc};

use async_stream::stream;
use axum::{
    body::Bytes,
    extract::{Query, Request, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    auth::AuthContext,
    errors::AppError,
    session::Session,
    transport::{sse::SseChannels, SseTransport},
    AppState,
};

pub const MESSAGES_PATH: &str = "/messages";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: String,
    pub version: String,
    pub sse_endpoint: String,
    pub messages_endpoint: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub session_id: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: state.server_info.name.clone(),
        version: state.server_info.version.clone(),
        sse_endpoint: state.sse_endpoint.to_string(),
        messages_endpoint: MESSAGES_PATH,
    })
}

/// Opens a session and streams its outbound messages as SSE `message` events.
///
/// The first event is `endpoint`, telling the client where to POST its messages.
pub async fn sse_connect(
    State(state): State<AppState>,
    request: Request,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let auth = request
        .extensions()
        .get::<AuthContext>()
        .map(|AuthContext(value)| value.clone());

    let session = Session::new(
        Arc::clone(&state.registry),
        Arc::clone(&state.server_info),
        auth,
        state.session_config.clone(),
    );
    let session_id = session.id().to_string();
    let (transport, channels) = SseTransport::new();
    let SseChannels {
        mut outbound,
        inbound,
        closed,
    } = channels;
    state.channels.insert(session_id.clone(), inbound);

    {
        let pool = state.pool.clone();
        tokio::spawn(async move {
            if let Err(err) = pool.open(session, Arc::new(transport)).await {
                warn!(error = %err, "sse session failed to open");
            }
        });
    }

    let guard = StreamGuard {
        channels: Arc::clone(&state.channels),
        session_id: session_id.clone(),
        closed: closed.clone(),
    };
    let endpoint = format!("{MESSAGES_PATH}?sessionId={session_id}");

    let events = stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));

        loop {
            let next = tokio::select! {
                _ = closed.cancelled() => None,
                message = outbound.recv() => message,
            };
            let Some(message) = next else {
                break;
            };
            yield Ok(Event::default().event("message").data(message.to_string()));
        }
    };

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Delivers one client message to the session named by `sessionId`.
pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let sender = state
        .channels
        .get(&query.session_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::not_found("unknown_session", "unknown session"))?;

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        AppError::bad_request("invalid_message", format!("invalid JSON-RPC message: {err}"))
    })?;

    sender
        .send(payload)
        .await
        .map_err(|_| AppError::not_found("session_closed", "session is closed"))?;
    Ok(StatusCode::ACCEPTED)
}

/// Unregisters the session's inbound channel and closes its transport when the stream ends.
struct StreamGuard {
    channels: Arc<DashMap<String, mpsc::Sender<Value>>>,
    session_id: String,
    closed: CancellationToken,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.channels.remove(&self.session_id);
        self.closed.cancel();
        debug!(session_id = %self.session_id, "sse stream ended");
    }
}
