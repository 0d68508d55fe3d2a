//! One broker connection from magic to close.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::handle::{ConnectionHandle, Shared};
use super::handshake::Handshake;
use super::state::ConnectionState;
use crate::config::ConnectionConfig;
use crate::error::{QueuewireError, Result};
use crate::handler::{IdentifyNegotiator, IdentifyResponse, MessageHandler};
use crate::protocol::Command;
use crate::reader::{spawn_receiver, Dispatcher};
use crate::transport::BoxedSocket;
use crate::writer::spawn_sender;

/// Owns a socket and runs the handshake, then the sender and receiver
/// loops, until the connection ends.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use queuewire_client::config::ConnectionConfig;
/// use queuewire_client::connection::{ConnectionHandle, ManagedConnection};
/// use queuewire_client::handler::FeatureNegotiator;
/// use queuewire_client::protocol::IncomingMessage;
///
/// # async fn example() -> queuewire_client::Result<()> {
/// let stream = tokio::net::TcpStream::connect("127.0.0.1:4150").await?;
/// let connection = ManagedConnection::new(
///     Box::new(stream),
///     "127.0.0.1",
///     Arc::new(ConnectionConfig::default()),
///     Arc::new(FeatureNegotiator::default()),
///     Arc::new(|_: &ConnectionHandle, msg: IncomingMessage| println!("{}", msg.id())),
/// );
/// let handle = connection.handle();
/// tokio::spawn(connection.run());
/// handle.close();
/// # Ok(())
/// # }
/// ```
pub struct ManagedConnection {
    socket: BoxedSocket,
    host: String,
    config: Arc<ConnectionConfig>,
    negotiator: Arc<dyn IdentifyNegotiator>,
    handler: Arc<dyn MessageHandler>,
    shared: Arc<Shared>,
    outbox: mpsc::Receiver<Command>,
}

impl ManagedConnection {
    /// Wrap an already connected socket.
    ///
    /// `host` is the name the broker certificate is checked against if the
    /// connection upgrades to TLS.
    pub fn new(
        socket: BoxedSocket,
        host: impl Into<String>,
        config: Arc<ConnectionConfig>,
        negotiator: Arc<dyn IdentifyNegotiator>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let (tx, outbox) = mpsc::channel(config.command_capacity);
        let shared = Arc::new(Shared::new(tx, config.ignore_quit));
        Self {
            socket,
            host: host.into(),
            config,
            negotiator,
            handler,
            shared,
            outbox,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.shared.clone())
    }

    /// Run until quit, socket close or a fatal error.
    ///
    /// The state is `Closed` when this returns, and any caller still
    /// waiting for a response gets [`QueuewireError::ConnectionClosed`].
    pub async fn run(self) -> Result<()> {
        let shared = self.shared.clone();
        let result = self.drive().await;

        shared.state.advance(ConnectionState::Closed);
        shared.correlator.release();
        match &result {
            Ok(()) => tracing::info!("Connection closed"),
            Err(e) => tracing::error!("Connection closed with error: {}", e),
        }
        result
    }

    async fn drive(self) -> Result<()> {
        let Self {
            socket,
            host,
            config,
            negotiator,
            handler,
            shared,
            outbox,
        } = self;

        shared.state.advance(ConnectionState::Handshaking);
        let mut handshake = Handshake::new(socket, shared.clone(), config.clone(), host);
        let response = handshake_with(&mut handshake, negotiator.as_ref()).await?;

        let (transport, frames, filters) = handshake.into_parts()?;
        let (write_filters, read_filters) = filters.split();
        let (read_half, write_half) = tokio::io::split(transport);

        let handle = ConnectionHandle::new(shared.clone());
        shared.state.advance(ConnectionState::Steady);
        tracing::info!("Connection steady");

        let sender = spawn_sender(
            outbox,
            write_half,
            write_filters,
            shared.clone(),
            config.idle_interval,
        );
        let dispatcher = Dispatcher::new(handle.clone(), handler, config.passive_errors.clone());
        let receiver = spawn_receiver(read_half, frames, read_filters, dispatcher, config.idle_interval);

        let follow_up = negotiator.needs_follow_up(&response).then(|| {
            let negotiator = negotiator.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = negotiator.follow_up(handle.clone(), response).await;
                if let Err(e) = &result {
                    tracing::error!("Post-handshake negotiation failed: {}", e);
                    handle.force_close();
                }
                result
            })
        });

        let (sent, received) = tokio::join!(sender, receiver);
        let followed = match follow_up {
            Some(task) if task.is_finished() => task.await.map_err(std::io::Error::from)?,
            Some(task) => {
                task.abort();
                Ok(())
            }
            None => Ok(()),
        };

        let received = received.map_err(std::io::Error::from)?;
        let sent = sent.map_err(std::io::Error::from)?;
        received.and(sent).and(followed)
    }
}

async fn handshake_with(
    handshake: &mut Handshake,
    negotiator: &dyn IdentifyNegotiator,
) -> Result<IdentifyResponse> {
    handshake.send_magic().await?;
    handshake.send(&negotiator.identify()?).await?;

    let payload = handshake.read_identify_response().await?;
    let response = IdentifyResponse::parse(&payload).map_err(|e| {
        QueuewireError::Protocol(format!("Malformed IDENTIFY response: {}", e))
    })?;
    tracing::debug!("IDENTIFY response: {:?}", response);

    handshake.enable_buffered_reads();
    negotiator.negotiate(handshake, &response).await?;
    Ok(response)
}
