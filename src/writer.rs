//! Outbound side: the sender loop.
//!
//! # Architecture
//!
//! ```text
//! ConnectionHandle ─┐
//! Receiver (NOP)   ─┼─► mpsc::Sender<Command> ─► Sender loop ─► write filters ─► socket
//! Follow-up task   ─┘
//! ```
//!
//! The loop polls the queue without blocking and sleeps for the idle
//! interval when it is empty, so quit flags are seen promptly even when
//! nothing is being sent.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionState, Shared};
use crate::error::Result;
use crate::filter::WriteFilters;
use crate::protocol::Command;

/// Filter `data` and write it out.
///
/// Nothing is written when the filters swallow the input.
pub(crate) async fn write_filtered<W>(writer: &mut W, filters: &mut WriteFilters, data: Bytes) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let out = filters.apply(data)?;
    if out.is_empty() {
        return Ok(());
    }
    writer.write_all(&out).await?;
    writer.flush().await?;
    Ok(())
}

/// Spawn the sender loop.
pub(crate) fn spawn_sender<W>(
    rx: mpsc::Receiver<Command>,
    writer: W,
    filters: WriteFilters,
    shared: Arc<Shared>,
    idle: Duration,
) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let result = sender_loop(rx, writer, filters, &shared, idle).await;
        if result.is_err() {
            shared.state.advance(ConnectionState::Draining);
        }
        result
    })
}

async fn sender_loop<W>(
    mut rx: mpsc::Receiver<Command>,
    mut writer: W,
    mut filters: WriteFilters,
    shared: &Shared,
    idle: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        if shared.should_stop() {
            tracing::debug!("Sender loop stopping");
            return Ok(());
        }

        let command = match rx.try_recv() {
            Ok(command) => command,
            Err(TryRecvError::Empty) => {
                tokio::time::sleep(idle).await;
                continue;
            }
            Err(TryRecvError::Disconnected) => return Ok(()),
        };

        shared.correlator.record_sent(&command.name);
        tracing::trace!("Sending {}", command.name);
        write_filtered(&mut writer, &mut filters, command.encode()).await?;
    }
}
