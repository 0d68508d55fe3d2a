//! # queuewire-client
//!
//! Client-side connection engine for a length-prefixed message-broker
//! protocol (the `"  V2"` wire protocol).
//!
//! A connection writes the protocol magic, negotiates features with
//! IDENTIFY (TLS, snappy or deflate compression, AUTH), then runs two
//! loops until it is told to quit:
//!
//! - **Sender**: drains the command queue through the write filters
//! - **Receiver**: reads frames through the read filters, answers
//!   heartbeats, routes responses to waiters and messages to the handler
//!
//! [`reconnect::ReconnectingConnection`] wraps this in a retry cycle.
//!
//! ## Example
//!
//! ```no_run
//! use queuewire_client::connection::ConnectionHandle;
//! use queuewire_client::handler::{FeatureNegotiator, IdentifyOptions};
//! use queuewire_client::protocol::{Command, IncomingMessage};
//! use queuewire_client::reconnect::{ReconnectingConnection, TcpNode};
//!
//! #[tokio::main]
//! async fn main() -> queuewire_client::Result<()> {
//!     let handler = |conn: &ConnectionHandle, msg: IncomingMessage| {
//!         let conn = conn.clone();
//!         tokio::spawn(async move { conn.send_command(Command::fin(msg.id())).await });
//!     };
//!
//!     let connection = ReconnectingConnection::builder(TcpNode::new("127.0.0.1", 4150), handler)
//!         .negotiator(FeatureNegotiator::new(IdentifyOptions::default().client_id("worker")))
//!         .build();
//!
//!     connection.run().await
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod filter;
pub mod handler;
pub mod protocol;
pub mod reconnect;
pub mod transport;

mod reader;
mod writer;

pub use config::ConnectionConfig;
pub use connection::{ConnectionHandle, ConnectionState, ManagedConnection};
pub use error::{QueuewireError, Result};
pub use reconnect::{ReconnectingConnection, TcpNode};
