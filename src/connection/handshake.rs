//! Handshake phase: exclusive use of the socket before the loops start.
//!
//! Every read here is a blocking, frame-at-a-time read. Heartbeats are
//! answered inline and passive errors are skipped, so negotiators only
//! ever see the responses they asked for.

use std::sync::Arc;

use bytes::Bytes;

use super::correlator::ResponseRoute;
use super::handle::Shared;
use crate::config::ConnectionConfig;
use crate::error::{QueuewireError, Result};
use crate::filter::{deflate_pair, snappy_pair, FilterChain};
use crate::protocol::{is_passive_error, Command, FrameType, MAGIC_V2, OK};
use crate::reader::FrameReader;
use crate::transport::{BoxedSocket, Transport};
use crate::writer::write_filtered;

/// Stream compression offered by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Deflate { level: u32 },
    Snappy,
}

/// The socket, read state and filters of a connection being set up.
pub struct Handshake {
    transport: Option<Transport>,
    reader: FrameReader,
    filters: FilterChain,
    shared: Arc<Shared>,
    config: Arc<ConnectionConfig>,
    host: String,
}

impl Handshake {
    pub(crate) fn new(
        socket: BoxedSocket,
        shared: Arc<Shared>,
        config: Arc<ConnectionConfig>,
        host: String,
    ) -> Self {
        Self {
            transport: Some(Transport::plain(socket)),
            reader: FrameReader::new(&config),
            filters: FilterChain::new(),
            shared,
            config,
            host,
        }
    }

    async fn write(&mut self, data: Bytes) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(QueuewireError::ConnectionClosed)?;
        write_filtered(transport, self.filters.write_filters(), data).await
    }

    pub(crate) async fn send_magic(&mut self) -> Result<()> {
        tracing::debug!("Sending protocol magic");
        self.write(Bytes::from_static(MAGIC_V2)).await
    }

    /// Write a command directly, bypassing the command queue.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        self.shared.correlator.record_sent(&command.name);
        tracing::trace!("Sending {} during handshake", command.name);
        self.write(command.encode()).await
    }

    /// Read the next RESPONSE that is not a heartbeat.
    async fn next_response(&mut self) -> Result<(ResponseRoute, Bytes)> {
        loop {
            let transport = self.transport.as_mut().ok_or(QueuewireError::ConnectionClosed)?;
            let frame = self
                .reader
                .read_frame(transport, self.filters.read_filters())
                .await?;

            match frame.frame_type {
                FrameType::Response => match self.shared.correlator.classify(&frame.payload) {
                    ResponseRoute::Heartbeat => {
                        tracing::debug!("Heartbeat during handshake");
                        self.send(&Command::nop()).await?;
                    }
                    route => return Ok((route, frame.payload)),
                },
                FrameType::Error => {
                    let text = String::from_utf8_lossy(&frame.payload).into_owned();
                    if is_passive_error(&frame.payload, &self.config.passive_errors) {
                        tracing::warn!("Broker error during handshake (ignored): {}", text);
                    } else {
                        return Err(QueuewireError::ServerError(text));
                    }
                }
                FrameType::Message => {
                    return Err(QueuewireError::Protocol(
                        "MESSAGE received before the handshake completed".to_string(),
                    ));
                }
            }
        }
    }

    /// Read the answer to IDENTIFY.
    pub(crate) async fn read_identify_response(&mut self) -> Result<Bytes> {
        match self.next_response().await? {
            (ResponseRoute::Identify, payload) => Ok(payload),
            (route, _) => Err(QueuewireError::Protocol(format!(
                "Expected IDENTIFY response, got {:?}",
                route
            ))),
        }
    }

    /// Read the next non-heartbeat RESPONSE payload.
    pub async fn read_response(&mut self) -> Result<Bytes> {
        self.next_response().await.map(|(_, payload)| payload)
    }

    async fn read_ack(&mut self, upgrade: &str) -> Result<()> {
        let payload = self.read_response().await?;
        if payload[..] != *OK {
            return Err(QueuewireError::Protocol(format!(
                "Unexpected {} acknowledgement: {}",
                upgrade,
                String::from_utf8_lossy(&payload)
            )));
        }
        Ok(())
    }

    /// Read in chunks from now on. Cannot be undone.
    pub fn enable_buffered_reads(&mut self) {
        if !self.reader.is_buffered() {
            tracing::debug!("Switching to buffered reads");
            self.reader.set_buffered();
            self.shared.mark_buffered_reads();
        }
    }

    /// Whether chunked reads are on.
    pub fn buffered_reads(&self) -> bool {
        self.reader.is_buffered()
    }

    /// Whether the socket has been upgraded to TLS.
    pub fn is_tls(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_tls)
    }

    /// Install a compression filter pair and read the broker's ack through it.
    ///
    /// Bytes already buffered past the previous response are passed through
    /// the new read filter before the ack is decoded.
    pub async fn activate_compression(&mut self, compression: Compression) -> Result<()> {
        let (encoder, mut decoder) = match compression {
            Compression::Deflate { level } => deflate_pair(level),
            Compression::Snappy => snappy_pair(),
        };
        // The ack may already be buffered behind the previous response.
        self.reader.refilter(decoder.as_mut())?;
        self.filters.append_write_filter(encoder);
        self.filters.append_read_filter(decoder);
        self.enable_buffered_reads();

        self.read_ack("compression").await?;
        tracing::info!("Compression enabled: {:?}", compression);
        Ok(())
    }

    /// Upgrade the socket to TLS and read the broker's ack over it.
    ///
    /// # Errors
    ///
    /// [`QueuewireError::Config`] without touching the socket when no trust
    /// bundle is configured.
    pub async fn activate_tls(&mut self) -> Result<()> {
        let connector = self.config.tls.connector()?;
        let server_name = self.config.tls.resolve_server_name(&self.host)?;

        if self.reader.has_leftover() {
            return Err(QueuewireError::Protocol(
                "Unread bytes buffered ahead of the TLS handshake".to_string(),
            ));
        }

        let socket = match self.transport.take() {
            Some(Transport::Plain(socket)) => socket,
            Some(tls @ Transport::Tls(_)) => {
                self.transport = Some(tls);
                return Err(QueuewireError::Protocol("TLS is already active".to_string()));
            }
            None => return Err(QueuewireError::ConnectionClosed),
        };

        tracing::debug!("Starting TLS handshake with {}", self.host);
        let stream = connector.connect(server_name, socket).await?;
        self.transport = Some(Transport::Tls(Box::new(stream)));
        self.shared.mark_tls();
        self.enable_buffered_reads();

        self.read_ack("TLS").await?;
        tracing::info!("TLS enabled");
        Ok(())
    }

    /// Hand the socket, read state and filters over to the loops.
    pub(crate) fn into_parts(self) -> Result<(Transport, FrameReader, FilterChain)> {
        let transport = self.transport.ok_or(QueuewireError::ConnectionClosed)?;
        Ok((transport, self.reader, self.filters))
    }
}
