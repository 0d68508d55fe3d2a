//! Reconnecting wrapper around [`ManagedConnection`].
//!
//! Opens a socket through a [`Node`], runs a managed connection on it and
//! starts over after a fixed pause whenever it ends, until closed. Only a
//! configuration error stops the cycle early.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpStream;

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionHandle, ManagedConnection, QuitSignal};
use crate::error::Result;
use crate::handler::{FeatureNegotiator, IdentifyNegotiator, MessageHandler};
use crate::transport::BoxedSocket;

/// Default pause between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where connections come from.
#[async_trait]
pub trait Node: Send + Sync + 'static {
    /// Host name, used for TLS verification and logging.
    fn server_name(&self) -> &str;

    /// Open a new socket. `quit` is raised when the wrapper is closing.
    async fn connect(&self, quit: &QuitSignal) -> Result<BoxedSocket>;
}

/// A broker reachable over TCP.
#[derive(Debug, Clone)]
pub struct TcpNode {
    host: String,
    port: u16,
    connect_timeout: Duration,
}

impl TcpNode {
    /// Node at `host:port` with the default connect timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Give up on a TCP connect after `timeout`.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

#[async_trait]
impl Node for TcpNode {
    fn server_name(&self) -> &str {
        &self.host
    }

    async fn connect(&self, _quit: &QuitSignal) -> Result<BoxedSocket> {
        let address = (self.host.as_str(), self.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("Connecting to {}:{} timed out", self.host, self.port),
                )
            })??;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// Builder for [`ReconnectingConnection`].
pub struct ReconnectingConnectionBuilder {
    node: Arc<dyn Node>,
    handler: Arc<dyn MessageHandler>,
    negotiator: Arc<dyn IdentifyNegotiator>,
    config: ConnectionConfig,
    retry_interval: Duration,
}

impl ReconnectingConnectionBuilder {
    /// Replace the default [`FeatureNegotiator`].
    pub fn negotiator(mut self, negotiator: impl IdentifyNegotiator) -> Self {
        self.negotiator = Arc::new(negotiator);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Pause between attempts. Fixed, not a backoff.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn build(self) -> ReconnectingConnection {
        ReconnectingConnection {
            node: self.node,
            handler: self.handler,
            negotiator: self.negotiator,
            config: Arc::new(self.config),
            retry_interval: self.retry_interval,
            quit: QuitSignal::new(),
            current: Mutex::new(None),
        }
    }
}

/// Keeps one managed connection to a node alive.
///
/// # Example
///
/// ```no_run
/// use queuewire_client::connection::ConnectionHandle;
/// use queuewire_client::protocol::{Command, IncomingMessage};
/// use queuewire_client::reconnect::{ReconnectingConnection, TcpNode};
///
/// # async fn example() -> queuewire_client::Result<()> {
/// let handler = |conn: &ConnectionHandle, msg: IncomingMessage| {
///     let conn = conn.clone();
///     tokio::spawn(async move { conn.send_command(Command::fin(msg.id())).await });
/// };
/// let connection = ReconnectingConnection::builder(TcpNode::new("127.0.0.1", 4150), handler).build();
/// connection.run().await
/// # }
/// ```
pub struct ReconnectingConnection {
    node: Arc<dyn Node>,
    handler: Arc<dyn MessageHandler>,
    negotiator: Arc<dyn IdentifyNegotiator>,
    config: Arc<ConnectionConfig>,
    retry_interval: Duration,
    quit: QuitSignal,
    current: Mutex<Option<ConnectionHandle>>,
}

impl ReconnectingConnection {
    /// Start building a wrapper that delivers messages to `handler`.
    pub fn builder(node: impl Node, handler: impl MessageHandler) -> ReconnectingConnectionBuilder {
        ReconnectingConnectionBuilder {
            node: Arc::new(node),
            handler: Arc::new(handler),
            negotiator: Arc::new(FeatureNegotiator::default()),
            config: ConnectionConfig::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Connect, run and reconnect until [`close`](Self::close).
    ///
    /// # Errors
    ///
    /// Returns the first [`QueuewireError::Config`](crate::QueuewireError::Config) raised by a connection;
    /// every other failure is logged and retried.
    pub async fn run(&self) -> Result<()> {
        let host = self.node.server_name().to_string();
        while !self.quit.is_raised() {
            match self.run_once(&host).await {
                Ok(()) => tracing::info!("Connection to {} ended", host),
                Err(e) if !e.is_retryable() => {
                    tracing::error!("Giving up on {}: {}", host, e);
                    self.current.lock().take();
                    return Err(e);
                }
                Err(e) => tracing::warn!("Connection to {} failed: {}", host, e),
            }
            self.current.lock().take();

            if self.quit.is_raised() {
                break;
            }
            tracing::debug!("Reconnecting to {} in {:?}", host, self.retry_interval);
            tokio::time::sleep(self.retry_interval).await;
        }
        tracing::info!("Stopped connecting to {}", host);
        Ok(())
    }

    async fn run_once(&self, host: &str) -> Result<()> {
        let socket = self.node.connect(&self.quit).await?;
        tracing::info!("Connected to {}", host);

        let connection = ManagedConnection::new(
            socket,
            host,
            self.config.clone(),
            self.negotiator.clone(),
            self.handler.clone(),
        );
        let handle = connection.handle();
        *self.current.lock() = Some(handle.clone());

        // close() may have run between the loop check and publishing the handle.
        if self.quit.is_raised() {
            handle.force_close();
        }
        connection.run().await
    }

    /// Stop reconnecting and force the current connection closed.
    pub fn close(&self) {
        self.quit.raise();
        if let Some(handle) = self.current.lock().as_ref() {
            handle.force_close();
        }
    }

    /// True while the current connection is steady.
    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(ConnectionHandle::is_steady)
    }

    /// Handle onto the current connection, if any.
    pub fn managed_connection(&self) -> Option<ConnectionHandle> {
        self.current.lock().clone()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.quit.is_raised()
    }
}
