//! Handler module - the pluggable collaborators of a connection.
//!
//! Provides:
//! - [`MessageHandler`] - receives every MESSAGE frame
//! - [`IdentifyNegotiator`] - builds IDENTIFY and acts on the broker's answer
//! - [`FeatureNegotiator`] - the stock negotiator (TLS, snappy/deflate, AUTH)
//!
//! # Example
//!
//! ```
//! use queuewire_client::connection::ConnectionHandle;
//! use queuewire_client::handler::MessageHandler;
//! use queuewire_client::protocol::{Command, IncomingMessage};
//!
//! fn accept_all(conn: &ConnectionHandle, msg: IncomingMessage) {
//!     let conn = conn.clone();
//!     tokio::spawn(async move { conn.send_command(Command::fin(msg.id())).await });
//! }
//!
//! fn assert_handler<H: MessageHandler>(_: H) {}
//! assert_handler(accept_all);
//! ```

mod identify;
mod negotiate;

use async_trait::async_trait;

use crate::connection::{ConnectionHandle, Handshake};
use crate::error::Result;
use crate::protocol::{Command, IncomingMessage};

pub use identify::{AuthResponse, IdentifyOptions, IdentifyResponse};
pub use negotiate::FeatureNegotiator;

/// Receives decoded messages on the receiver loop.
///
/// Called synchronously; long work should be moved onto a task so the
/// loop keeps draining the socket.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, connection: &ConnectionHandle, message: IncomingMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&ConnectionHandle, IncomingMessage) + Send + Sync + 'static,
{
    fn handle(&self, connection: &ConnectionHandle, message: IncomingMessage) {
        self(connection, message)
    }
}

/// Drives the IDENTIFY exchange.
#[async_trait]
pub trait IdentifyNegotiator: Send + Sync + 'static {
    /// The IDENTIFY command to send right after the magic.
    fn identify(&self) -> Result<Command>;

    /// Apply the broker's answer: upgrade to TLS, install compression.
    ///
    /// Runs before the loops start, with exclusive use of the socket.
    async fn negotiate(&self, handshake: &mut Handshake, response: &IdentifyResponse) -> Result<()>;

    /// Whether [`follow_up`](Self::follow_up) should run once steady.
    fn needs_follow_up(&self, _response: &IdentifyResponse) -> bool {
        false
    }

    /// Work that needs the running loops, such as AUTH.
    ///
    /// An error closes the connection.
    async fn follow_up(&self, _connection: ConnectionHandle, _response: IdentifyResponse) -> Result<()> {
        Ok(())
    }
}
