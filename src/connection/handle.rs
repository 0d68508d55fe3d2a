//! Cloneable handle onto a running connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::correlator::Correlator;
use super::state::{AtomicState, ConnectionState, Signals};
use crate::error::{QueuewireError, Result};
use crate::protocol::Command;

/// State shared by the handle, the loops and the handshake.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: AtomicState,
    pub(crate) signals: Signals,
    pub(crate) correlator: Correlator,
    buffered_reads: AtomicBool,
    tls: AtomicBool,
}

impl Shared {
    pub(crate) fn new(outbox: mpsc::Sender<Command>, ignore_quit: bool) -> Self {
        Self {
            state: AtomicState::new(),
            signals: Signals::new(ignore_quit),
            correlator: Correlator::new(outbox),
            buffered_reads: AtomicBool::new(false),
            tls: AtomicBool::new(false),
        }
    }

    /// Whether the loops should exit; moves the state to `Draining` if so.
    pub(crate) fn should_stop(&self) -> bool {
        if self.signals.should_stop() || self.state.load() >= ConnectionState::Draining {
            self.state.advance(ConnectionState::Draining);
            true
        } else {
            false
        }
    }

    pub(crate) fn mark_buffered_reads(&self) {
        self.buffered_reads.store(true, Ordering::Release);
    }

    pub(crate) fn mark_tls(&self) {
        self.tls.store(true, Ordering::Release);
    }
}

/// Handle for sending commands to and controlling a connection.
///
/// Cheap to clone; every clone talks to the same connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub(crate) shared: Arc<Shared>,
}

impl ConnectionHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// True while both loops are running.
    pub fn is_steady(&self) -> bool {
        self.state() == ConnectionState::Steady
    }

    /// Whether reads are no longer limited to the bytes of the next frame.
    pub fn buffered_reads(&self) -> bool {
        self.shared.buffered_reads.load(Ordering::Acquire)
    }

    /// Whether the socket has been upgraded to TLS.
    pub fn is_tls(&self) -> bool {
        self.shared.tls.load(Ordering::Acquire)
    }

    /// Name of the last command written to the socket.
    pub fn last_command(&self) -> Option<String> {
        self.shared.correlator.last_command()
    }

    /// Queue a command, optionally waiting for its RESPONSE payload.
    ///
    /// # Errors
    ///
    /// [`QueuewireError::ConnectionClosed`] once the connection is draining
    /// or closed, or if it ends before the response arrives.
    pub async fn send(&self, command: Command, wait_for_response: bool) -> Result<Option<Bytes>> {
        if self.state() >= ConnectionState::Draining {
            return Err(QueuewireError::ConnectionClosed);
        }
        tracing::trace!("Queueing {}", command.name);
        self.shared.correlator.send(command, wait_for_response).await
    }

    /// Queue a command without waiting.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.send(command, false).await.map(|_| ())
    }

    /// Queue a command and wait for its RESPONSE payload.
    pub async fn request(&self, command: Command) -> Result<Bytes> {
        self.send(command, true)
            .await?
            .ok_or(QueuewireError::ConnectionClosed)
    }

    /// Request a cooperative shutdown. Ignored while `ignore_quit` is set.
    pub fn close(&self) {
        tracing::debug!("Quit requested");
        self.shared.signals.quit.raise();
    }

    /// Shut down regardless of `ignore_quit`.
    pub fn force_close(&self) {
        tracing::debug!("Forced quit requested");
        self.shared.signals.force.raise();
    }

    /// While set, [`close`](Self::close) is ignored. A forced quit still
    /// ends the connection.
    pub fn set_ignore_quit(&self, ignore: bool) {
        self.shared.signals.set_ignore_quit(ignore);
    }

    /// Whether cooperative quits are currently ignored.
    pub fn ignores_quit(&self) -> bool {
        self.shared.signals.ignores_quit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(4);
        (ConnectionHandle::new(Arc::new(Shared::new(tx, false))), rx)
    }

    #[test]
    fn test_new_handle_state() {
        let (handle, _rx) = handle();
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert!(!handle.is_steady());
        assert!(!handle.buffered_reads());
        assert!(!handle.is_tls());
        assert!(handle.last_command().is_none());
    }

    #[tokio::test]
    async fn test_send_command_reaches_queue() {
        let (handle, mut rx) = handle();
        handle.send_command(Command::rdy(1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Command::rdy(1));
    }

    #[tokio::test]
    async fn test_send_rejected_while_draining() {
        let (handle, mut rx) = handle();
        handle.shared.state.advance(ConnectionState::Draining);

        let result = handle.send_command(Command::nop()).await;
        assert!(matches!(result, Err(QueuewireError::ConnectionClosed)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_close_respects_ignore_quit() {
        let (handle, _rx) = handle();
        handle.set_ignore_quit(true);
        handle.close();
        assert!(!handle.shared.should_stop());
        assert_eq!(handle.state(), ConnectionState::Connecting);

        handle.force_close();
        assert!(handle.shared.should_stop());
        assert_eq!(handle.state(), ConnectionState::Draining);
    }

    #[test]
    fn test_clones_share_state() {
        let (handle, _rx) = handle();
        let other = handle.clone();
        other.close();
        assert!(handle.shared.should_stop());
    }
}
