//! Gateway connection lifecycle.
//!
//! [`ConnectionManager`] owns at most one [`Connection`]. `open` is
//! idempotent: while a connection is held it is returned as-is, without a
//! new handshake. `close` shuts it down; the next `open` dials again.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::errors::ConnectionError;

/// Port of the binary gateway.
pub const GATEWAY_PORT: u16 = 2195;
/// Production gateway host.
pub const PRODUCTION_GATEWAY_HOST: &str = "gateway.push.apple.com";
/// Sandbox gateway host.
pub const SANDBOX_GATEWAY_HOST: &str = "gateway.sandbox.push.apple.com";

/// Gateway environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Live gateway.
    Production,
    /// Development gateway.
    #[default]
    Sandbox,
}

impl Environment {
    /// Whether this is the production gateway.
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Production => "production",
            Self::Sandbox => "sandbox",
        })
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "sandbox" | "development" | "dev" => Ok(Self::Sandbox),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

/// Host and port of a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// DNS name, also used as the TLS server name.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Default production gateway.
    pub fn production() -> Self {
        Self::new(PRODUCTION_GATEWAY_HOST, GATEWAY_PORT)
    }

    /// Default sandbox gateway.
    pub fn sandbox() -> Self {
        Self::new(SANDBOX_GATEWAY_HOST, GATEWAY_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Byte stream to the gateway.
pub trait GatewayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> GatewayStream for T {}

/// Dials the gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new stream to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint)
    -> Result<Box<dyn GatewayStream>, ConnectionError>;
}

/// An open gateway stream.
pub struct Connection {
    pub(crate) stream: Box<dyn GatewayStream>,
    endpoint: Endpoint,
    /// Bytes of an error response that has not fully arrived yet.
    pub(crate) partial_response: Vec<u8>,
    frames_written: u64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap an established stream.
    pub fn new(stream: Box<dyn GatewayStream>, endpoint: Endpoint) -> Self {
        Self {
            stream,
            endpoint,
            partial_response: Vec::new(),
            frames_written: 0,
        }
    }

    /// Endpoint this connection was opened to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Frames fully written so far.
    pub const fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Write a whole frame, blocking until the transport accepted every byte.
    pub async fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await?;
        self.frames_written += 1;
        Ok(())
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(endpoint = %self.endpoint, error = %e, "gateway shutdown failed");
        }
    }
}

/// Owns the single gateway connection.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    connection: Option<Connection>,
    handshakes: u64,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("open", &self.connection.is_some())
            .field("handshakes", &self.handshakes)
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Create a closed manager for `endpoint`.
    pub fn new(connector: Arc<dyn Connector>, endpoint: Endpoint) -> Self {
        Self {
            connector,
            endpoint,
            connection: None,
            handshakes: 0,
        }
    }

    /// Target endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether a connection is currently held.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Number of connections established over the manager's lifetime.
    pub const fn handshakes(&self) -> u64 {
        self.handshakes
    }

    /// Return the open connection, dialing first if there is none.
    pub async fn open(&mut self) -> Result<&mut Connection, ConnectionError> {
        let connection = match self.connection.take() {
            Some(existing) => {
                debug!(endpoint = %self.endpoint, "reusing gateway connection");
                existing
            }
            None => {
                let stream = self.connector.connect(&self.endpoint).await.inspect_err(|e| {
                    warn!(endpoint = %self.endpoint, error = %e, "gateway connection failed");
                })?;
                self.handshakes += 1;
                info!(endpoint = %self.endpoint, "gateway connection opened");
                Connection::new(stream, self.endpoint.clone())
            }
        };
        Ok(self.connection.insert(connection))
    }

    /// Close the connection, if any.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            let frames = connection.frames_written();
            connection.shutdown().await;
            info!(endpoint = %self.endpoint, frames, "gateway connection closed");
        }
    }
}
