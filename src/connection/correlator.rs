//! Command/response correlation.
//!
//! The broker answers commands strictly in order and carries no request
//! id, so correlation is positional:
//! - heartbeats are answered with `NOP` and never reach a waiter
//! - the first other RESPONSE on a connection answers IDENTIFY
//! - every later RESPONSE answers the last command the sender dequeued
//!
//! Only one caller may wait for a response at a time. That is a protocol
//! rule, not something this type enforces.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{QueuewireError, Result};
use crate::protocol::{Command, HEARTBEAT};

/// Where a RESPONSE payload belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResponseRoute {
    /// Heartbeat; answer with `NOP`.
    Heartbeat,
    /// First response of the connection; answers IDENTIFY.
    Identify,
    /// Answer to the last dequeued command.
    Reply { command: Option<String> },
}

/// Tracks the in-flight command and the single response waiter.
#[derive(Debug)]
pub struct Correlator {
    outbox: mpsc::Sender<Command>,
    last_command: Mutex<Option<String>>,
    waiter: Mutex<Option<oneshot::Sender<Bytes>>>,
    identified: AtomicBool,
}

impl Correlator {
    pub(crate) fn new(outbox: mpsc::Sender<Command>) -> Self {
        Self {
            outbox,
            last_command: Mutex::new(None),
            waiter: Mutex::new(None),
            identified: AtomicBool::new(false),
        }
    }

    /// Queue a command for the sender loop.
    ///
    /// With `wait_for_response`, suspends until the next non-heartbeat
    /// RESPONSE arrives and returns its payload.
    ///
    /// # Errors
    ///
    /// [`QueuewireError::ConnectionClosed`] if the sender loop is gone or the
    /// connection ends before a response arrives.
    pub async fn send(&self, command: Command, wait_for_response: bool) -> Result<Option<Bytes>> {
        let waiter = wait_for_response.then(|| self.arm());

        if self.outbox.send(command).await.is_err() {
            self.release();
            return Err(QueuewireError::ConnectionClosed);
        }

        match waiter {
            None => Ok(None),
            Some(rx) => rx
                .await
                .map(Some)
                .map_err(|_| QueuewireError::ConnectionClosed),
        }
    }

    fn arm(&self) -> oneshot::Receiver<Bytes> {
        let (tx, rx) = oneshot::channel();
        if self.waiter.lock().replace(tx).is_some() {
            tracing::warn!("Replacing a pending response waiter; responses are serial");
        }
        rx
    }

    /// Record the command the sender just dequeued.
    pub(crate) fn record_sent(&self, name: &str) {
        *self.last_command.lock() = Some(name.to_string());
    }

    /// Name of the last command handed to the socket.
    pub fn last_command(&self) -> Option<String> {
        self.last_command.lock().clone()
    }

    /// Whether the IDENTIFY answer has been seen.
    pub fn is_identified(&self) -> bool {
        self.identified.load(Ordering::Acquire)
    }

    /// Classify a RESPONSE payload.
    pub(crate) fn classify(&self, payload: &[u8]) -> ResponseRoute {
        if payload == HEARTBEAT {
            return ResponseRoute::Heartbeat;
        }
        if !self.identified.swap(true, Ordering::AcqRel) {
            return ResponseRoute::Identify;
        }
        ResponseRoute::Reply {
            command: self.last_command(),
        }
    }

    /// Hand a payload to the waiter, if any.
    ///
    /// Returns false when nobody was waiting.
    pub(crate) fn resolve(&self, payload: Bytes) -> bool {
        match self.waiter.lock().take() {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    /// Drop any pending waiter; it observes `ConnectionClosed`.
    pub(crate) fn release(&self) {
        self.waiter.lock().take();
    }

    /// Queue the `NOP` answering a heartbeat.
    pub(crate) async fn answer_heartbeat(&self) -> Result<()> {
        self.outbox
            .send(Command::nop())
            .await
            .map_err(|_| QueuewireError::ConnectionClosed)
    }
}
