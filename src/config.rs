use std::{env, net::SocketAddr, time::Duration};

use thiserror::Error;

use crate::{server::StartOptions, session::SessionConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub bind_addr: String,
    pub bind_port: u16,
    pub sse_endpoint: String,
    pub api_token: Option<String>,
    pub keepalive_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_TRANSPORT must be `stdio` or `sse`, got `{0}`")]
    InvalidTransport(String),
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("MCP_SSE_ENDPOINT must start with `/`")]
    InvalidEndpoint,
    #[error("MCP_KEEPALIVE_MS must be a positive integer")]
    InvalidKeepalive,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, `from_env` being the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let transport = match value("MCP_TRANSPORT").as_deref() {
            None | Some("stdio") => TransportKind::Stdio,
            Some("sse") => TransportKind::Sse,
            Some(other) => return Err(ConfigError::InvalidTransport(other.to_string())),
        };
        let bind_addr = value("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = value("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);
        let sse_endpoint = value("MCP_SSE_ENDPOINT").unwrap_or_else(|| "/sse".to_string());
        if !sse_endpoint.starts_with('/') {
            return Err(ConfigError::InvalidEndpoint);
        }
        let keepalive_ms = value("MCP_KEEPALIVE_MS")
            .map(|value| {
                value
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .ok_or(ConfigError::InvalidKeepalive)
            })
            .transpose()?
            .unwrap_or(1000);

        let config = Self {
            transport,
            bind_addr,
            bind_port,
            sse_endpoint,
            api_token: value("MCP_API_TOKEN"),
            keepalive_ms,
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }

    pub fn start_options(&self) -> StartOptions {
        match self.transport {
            TransportKind::Stdio => StartOptions::Stdio,
            TransportKind::Sse => StartOptions::Sse {
                bind_addr: self.bind_addr.clone(),
                port: self.bind_port,
                endpoint: self.sse_endpoint.clone(),
            },
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keepalive_interval: Duration::from_millis(self.keepalive_ms),
            ..SessionConfig::default()
        }
    }
}
