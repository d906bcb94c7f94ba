use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

pub mod auth;
pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod pool;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

use auth::Authenticator;
use pool::SessionPool;
use registry::Registry;
use server::ServerInfo;
use session::SessionConfig;

pub use server::{McpServer, ServerError, StartOptions};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub server_info: Arc<ServerInfo>,
    pub session_config: SessionConfig,
    pub pool: SessionPool,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub sse_endpoint: Arc<str>,
    pub channels: Arc<DashMap<String, mpsc::Sender<Value>>>,
}

impl AppState {
    pub fn new(
        registry: Arc<Registry>,
        server_info: Arc<ServerInfo>,
        session_config: SessionConfig,
        pool: SessionPool,
        authenticator: Option<Arc<dyn Authenticator>>,
        sse_endpoint: String,
    ) -> Self {
        Self {
            registry,
            server_info,
            session_config,
            pool,
            authenticator,
            sse_endpoint: Arc::<str>::from(sse_endpoint),
            channels: Arc::new(DashMap::new()),
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(state.sse_endpoint.as_ref(), get(http::handlers::sse_connect))
        .route(
            http::handlers::MESSAGES_PATH,
            post(http::handlers::post_message),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_authentication,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}
