//! Host-facing server: registration, start/stop and connection events

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use thiserror::Error;
use tokio::{net::TcpListener, sync::broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    auth::Authenticator,
    build_app,
    domain::{
        prompts::Prompt,
        resources::{Resource, ResourceTemplate},
        tools::Tool,
    },
    pool::{ServerEvent, SessionPool},
    registry::{Registry, RegistryError},
    session::{Session, SessionConfig},
    transport::{StdioTransport, Transport},
    AppState,
};

/// Name, version and optional instructions reported to clients in `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub instructions: Option<String>,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            instructions: None,
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOptions {
    Stdio,
    Sse {
        bind_addr: String,
        port: u16,
        endpoint: String,
    },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already started")]
    AlreadyStarted,
    #[error("invalid bind address `{0}`")]
    InvalidBindAddress(String),
    #[error("SSE endpoint `{0}` must start with `/`")]
    InvalidEndpoint(String),
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),
}

pub struct McpServer {
    info: Arc<ServerInfo>,
    registry: Registry,
    session_config: SessionConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    pool: SessionPool,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
    shutdown: CancellationToken,
}

impl McpServer {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            info: Arc::new(info),
            registry: Registry::default(),
            session_config: SessionConfig::default(),
            authenticator: None,
            pool: SessionPool::new(),
            started: AtomicBool::new(false),
            local_addr: OnceLock::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Runs on every SSE connection; its value reaches tools as their session.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn add_tool(&mut self, tool: Tool) -> Result<&mut Self, RegistryError> {
        self.registry.add_tool(tool)?;
        Ok(self)
    }

    pub fn add_resource(&mut self, resource: Resource) -> Result<&mut Self, RegistryError> {
        self.registry.add_resource(resource)?;
        Ok(self)
    }

    pub fn add_resource_template(
        &mut self,
        template: ResourceTemplate,
    ) -> Result<&mut Self, RegistryError> {
        self.registry.add_resource_template(template)?;
        Ok(self)
    }

    pub fn add_prompt(&mut self, prompt: Prompt) -> Result<&mut Self, RegistryError> {
        self.registry.add_prompt(prompt)?;
        Ok(self)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.pool.subscribe()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.pool.sessions()
    }

    /// Address the SSE listener bound to, once started in SSE mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Starts serving. Registrations made afterwards are not seen by clients.
    pub async fn start(&self, options: StartOptions) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        let registry = Arc::new(self.registry.clone());

        match options {
            StartOptions::Stdio => {
                self.start_stdio(registry);
                Ok(())
            }
            StartOptions::Sse {
                bind_addr,
                port,
                endpoint,
            } => {
                let result = self.start_sse(registry, &bind_addr, port, endpoint).await;
                if result.is_err() {
                    self.started.store(false, Ordering::SeqCst);
                }
                result
            }
        }
    }

    /// Closes every session and shuts the listener down.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.pool.close_all().await;
        info!(name = %self.info.name, "server stopped");
    }

    /// Resolves once the server has been stopped, or the stdio peer went away.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }

    fn start_stdio(&self, registry: Arc<Registry>) {
        let session = Session::new(
            registry,
            Arc::clone(&self.info),
            None,
            self.session_config.clone(),
        );
        let transport: Arc<dyn Transport> = Arc::new(StdioTransport::new());
        let pool = self.pool.clone();
        let shutdown = self.shutdown.clone();

        info!(name = %self.info.name, transport = "stdio", "server starting");
        tokio::spawn(async move {
            if let Err(err) = pool.open(Arc::clone(&session), transport).await {
                warn!(error = %err, "stdio session failed to open");
            }
            session.closed().await;
            shutdown.cancel();
        });
    }

    async fn start_sse(
        &self,
        registry: Arc<Registry>,
        bind_addr: &str,
        port: u16,
        endpoint: String,
    ) -> Result<(), ServerError> {
        if !endpoint.starts_with('/') {
            return Err(ServerError::InvalidEndpoint(endpoint));
        }
        let socket = format!("{bind_addr}:{port}")
            .parse::<SocketAddr>()
            .map_err(|_| ServerError::InvalidBindAddress(bind_addr.to_string()))?;

        let listener = TcpListener::bind(socket).await?;
        let local_addr = listener.local_addr()?;
        let _ = self.local_addr.set(local_addr);

        let state = AppState::new(
            registry,
            Arc::clone(&self.info),
            self.session_config.clone(),
            self.pool.clone(),
            self.authenticator.clone(),
            endpoint.clone(),
        );
        let app = build_app(state);
        let shutdown = self.shutdown.clone();

        info!(
            name = %self.info.name,
            transport = "sse",
            %local_addr,
            endpoint = %endpoint,
            "server starting"
        );
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                error!(error = %err, "http server failed");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::{domain::content::ToolOutput, domain::tools::ToolContext, errors::HandlerError};

    fn noop_tool(name: &str) -> Tool {
        Tool::new(name, |_args: Value, _ctx: ToolContext| async {
            Ok::<_, HandlerError>(ToolOutput::Text(String::new()))
        })
    }

    #[test]
    fn registration_chains_and_rejects_duplicates() {
        let mut server = McpServer::new(ServerInfo::new("host", "1.0.0"));
        server
            .add_tool(noop_tool("a"))
            .and_then(|server| server.add_tool(noop_tool("b")))
            .expect("distinct tools register");

        let err = server
            .add_tool(noop_tool("a"))
            .err()
            .expect("duplicate tool");
        assert!(matches!(err, RegistryError::Duplicate { kind: "tool", .. }));
    }

    #[tokio::test]
    async fn sse_start_binds_and_stops() {
        let server = McpServer::new(ServerInfo::new("host", "1.0.0"));
        let options = StartOptions::Sse {
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            endpoint: "/sse".to_string(),
        };

        server.start(options.clone()).await.expect("start");
        assert!(server.local_addr().is_some_and(|addr| addr.port() != 0));
        assert!(matches!(
            server.start(options).await,
            Err(ServerError::AlreadyStarted)
        ));

        server.stop().await;
        server.stopped().await;
    }

    #[tokio::test]
    async fn sse_start_rejects_relative_endpoint() {
        let server = McpServer::new(ServerInfo::new("host", "1.0.0"));
        let err = server
            .start(StartOptions::Sse {
                bind_addr: "127.0.0.1".to_string(),
                port: 0,
                endpoint: "sse".to_string(),
            })
            .await
            .expect_err("relative endpoint");
        assert!(matches!(err, ServerError::InvalidEndpoint(_)));
    }
}
