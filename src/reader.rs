//! Inbound side: socket reads, frame decoding and the receiver loop.
//!
//! Until buffered-read mode is switched on, the reader asks the socket
//! for exactly the bytes the decoder still needs, so nothing past the
//! current frame is consumed. That keeps the stream clean for a TLS or
//! compression upgrade that may start right after it. Buffered mode reads
//! in large chunks and is never switched off again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::connection::correlator::ResponseRoute;
use crate::connection::{ConnectionHandle, ConnectionState};
use crate::error::{QueuewireError, Result};
use crate::filter::{Filter, ReadFilters};
use crate::handler::MessageHandler;
use crate::protocol::{
    is_passive_error, names, Frame, FrameBuffer, FrameDecoder, FrameType, IncomingMessage,
    CLOSE_WAIT,
};

/// Accumulates filtered socket bytes and yields complete frames.
pub(crate) struct FrameReader {
    buffer: FrameBuffer,
    decoder: FrameDecoder,
    scratch: Vec<u8>,
    chunk_size: usize,
    buffered: bool,
}

impl FrameReader {
    pub(crate) fn new(config: &ConnectionConfig) -> Self {
        Self {
            buffer: FrameBuffer::new(),
            decoder: FrameDecoder::with_max_frame_size(config.max_frame_size),
            scratch: Vec::new(),
            chunk_size: config.read_chunk_size,
            buffered: false,
        }
    }

    /// Switch to chunked reads for the rest of the connection.
    pub(crate) fn set_buffered(&mut self) {
        self.buffered = true;
    }

    pub(crate) fn is_buffered(&self) -> bool {
        self.buffered
    }

    /// Whether bytes past the last decoded frame are sitting in the buffer.
    pub(crate) fn has_leftover(&self) -> bool {
        !self.buffer.is_empty() || self.decoder.has_pending_header()
    }

    /// Run bytes buffered ahead of a newly installed read filter through it.
    ///
    /// Chunked reads can pull bytes encoded by the new filter off the socket
    /// before it is installed. Those bytes passed only the older filters.
    ///
    /// # Errors
    ///
    /// [`QueuewireError::Protocol`] if a frame header has already been
    /// consumed, since that header was read without the new filter.
    pub(crate) fn refilter(&mut self, filter: &mut dyn Filter) -> Result<()> {
        if self.decoder.has_pending_header() {
            return Err(QueuewireError::Protocol(
                "Read filter installed in the middle of a frame".to_string(),
            ));
        }
        if self.buffer.is_empty() {
            return Ok(());
        }

        let leftover = self.buffer.flush();
        let raw_len = leftover.len();
        let data = filter.apply(leftover)?;
        tracing::debug!(
            "Re-filtered {} buffered bytes through {} ({} after)",
            raw_len,
            filter.name(),
            data.len()
        );
        self.buffer.push(&data);
        Ok(())
    }

    /// Decode the next frame already sitting in the buffer.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.decoder.decode(&mut self.buffer)
    }

    /// Read once from the socket, filter and buffer the bytes.
    ///
    /// Returns the number of raw bytes read; 0 means end of stream.
    ///
    /// # Errors
    ///
    /// [`QueuewireError::FilterLengthMismatch`] if a read filter changes
    /// the byte count while reads are still exact.
    pub(crate) async fn fill<R>(&mut self, reader: &mut R, filters: &mut ReadFilters) -> Result<usize>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let want = if self.buffered {
            self.chunk_size
        } else {
            self.decoder.bytes_needed(&self.buffer).max(1)
        };
        if self.scratch.len() < want {
            self.scratch.resize(want, 0);
        }

        let n = reader.read(&mut self.scratch[..want]).await?;
        if n == 0 {
            return Ok(0);
        }

        let raw = Bytes::copy_from_slice(&self.scratch[..n]);
        let data = filters.apply(raw)?;
        if !self.buffered && data.len() != n {
            return Err(QueuewireError::FilterLengthMismatch {
                expected: n,
                actual: data.len(),
            });
        }

        tracing::trace!("Read {} bytes ({} after filters)", n, data.len());
        self.buffer.push(&data);
        Ok(n)
    }

    /// Read until one complete frame is available.
    pub(crate) async fn read_frame<R>(&mut self, reader: &mut R, filters: &mut ReadFilters) -> Result<Frame>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(frame);
            }
            if self.fill(reader, filters).await? == 0 {
                return Err(QueuewireError::ConnectionClosed);
            }
        }
    }
}

/// Routes decoded frames while the connection is steady.
pub(crate) struct Dispatcher {
    handle: ConnectionHandle,
    handler: Arc<dyn MessageHandler>,
    passive_errors: Vec<String>,
}

impl Dispatcher {
    pub(crate) fn new(
        handle: ConnectionHandle,
        handler: Arc<dyn MessageHandler>,
        passive_errors: Vec<String>,
    ) -> Self {
        Self {
            handle,
            handler,
            passive_errors,
        }
    }

    /// Handle one frame. An `Err` ends the connection.
    pub(crate) async fn dispatch(&self, frame: Frame) -> Result<()> {
        match frame.frame_type {
            FrameType::Response => self.on_response(frame.payload).await,
            FrameType::Error => self.on_error(&frame.payload),
            FrameType::Message => {
                let message = IncomingMessage::decode(&frame.payload)?;
                tracing::trace!("Dispatching message {}", message.id());
                self.handler.handle(&self.handle, message);
                Ok(())
            }
        }
    }

    async fn on_response(&self, payload: Bytes) -> Result<()> {
        let shared = &self.handle.shared;
        match shared.correlator.classify(&payload) {
            ResponseRoute::Heartbeat => {
                tracing::debug!("Heartbeat received");
                shared.correlator.answer_heartbeat().await
            }
            ResponseRoute::Identify => {
                tracing::warn!("IDENTIFY response arrived after the handshake");
                Ok(())
            }
            ResponseRoute::Reply { command } => {
                if command.as_deref() == Some(names::CLS) && payload[..] == *CLOSE_WAIT {
                    tracing::info!("Broker acknowledged CLS; closing");
                    shared.signals.force.raise();
                }
                if !shared.correlator.resolve(payload) {
                    tracing::trace!("Response to {:?} with no waiter", command);
                }
                Ok(())
            }
        }
    }

    fn on_error(&self, payload: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(payload).into_owned();
        if is_passive_error(payload, &self.passive_errors) {
            tracing::warn!("Broker error (ignored): {}", text);
            Ok(())
        } else {
            tracing::error!("Broker error: {}", text);
            Err(QueuewireError::ServerError(text))
        }
    }
}

/// Spawn the receiver loop.
pub(crate) fn spawn_receiver<R>(
    reader: R,
    frames: FrameReader,
    filters: ReadFilters,
    dispatcher: Dispatcher,
    idle: Duration,
) -> JoinHandle<Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let result = receiver_loop(reader, frames, filters, &dispatcher, idle).await;
        if result.is_err() {
            dispatcher.handle.shared.state.advance(ConnectionState::Draining);
        }
        result
    })
}

/// Decode and dispatch frames until a quit is observed or the socket ends.
///
/// Each read is bounded by `idle` so the quit flags are rechecked even on
/// a silent connection.
async fn receiver_loop<R>(
    mut reader: R,
    mut frames: FrameReader,
    mut filters: ReadFilters,
    dispatcher: &Dispatcher,
    idle: Duration,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let shared = &dispatcher.handle.shared;
    loop {
        if shared.should_stop() {
            tracing::debug!("Receiver loop stopping");
            return Ok(());
        }

        if let Some(frame) = frames.next_frame()? {
            dispatcher.dispatch(frame).await?;
            continue;
        }

        match tokio::time::timeout(idle, frames.fill(&mut reader, &mut filters)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                if shared.should_stop() {
                    return Ok(());
                }
                tracing::warn!("Broker closed the connection");
                return Err(QueuewireError::ConnectionClosed);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
        }
    }
}
